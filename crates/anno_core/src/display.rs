//! Text rendering of dual values.
//!
//! Numbers use the shortest round-trip form (`6.25`, `5.0`), vectors are
//! written `[a, b]` and matrices as row lists `[[a, b], [c, d]]`.

use crate::dual::DualValue;
use crate::shape::{Derivative, Value};
use nalgebra::DMatrix;
use std::fmt;

fn write_entries<'a>(
    f: &mut fmt::Formatter<'_>,
    entries: impl Iterator<Item = &'a f64>,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, entry) in entries.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{:?}", entry)?;
    }
    f.write_str("]")
}

fn write_rows(f: &mut fmt::Formatter<'_>, matrix: &DMatrix<f64>) -> fmt::Result {
    f.write_str("[")?;
    for (i, row) in matrix.row_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_entries(f, row.iter())?;
    }
    f.write_str("]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{:?}", v),
            Value::Vector(v) => write_entries(f, v.iter()),
        }
    }
}

impl fmt::Display for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Derivative::Scalar(d) => write!(f, "{:?}", d),
            Derivative::Vector(d) => write_entries(f, d.iter()),
            Derivative::Matrix(d) => write_rows(f, d),
        }
    }
}

impl fmt::Display for DualValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "====== Function Value(s) ======")?;
        writeln!(f, "{}", self.value())?;
        writeln!(f, "===== Derivative Value(s) =====")?;
        write!(f, "{}", self.derivative())
    }
}
