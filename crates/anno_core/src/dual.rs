//! The dual value: a function value paired with its exact derivative.
//!
//! `value` holds one output (scalar) or `n` outputs (vector). `derivative`
//! holds the tangent with respect to `m` independent variables, in the
//! canonical shape for `(n, m)`:
//!
//! | value        | m = 1         | m > 1          |
//! |--------------|---------------|----------------|
//! | scalar       | scalar        | length-m row   |
//! | length-n     | length-n      | n × m matrix   |
//!
//! `m` is fixed when a value is seeded and carried through every operation.

use crate::error::{AdError, Result};
use crate::shape::{Derivative, RawDerivative, RawValue, Value};
use nalgebra::{DMatrix, DVector};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDual", into = "RawDual")]
pub struct DualValue {
    value: Value,
    derivative: Derivative,
    variables: usize,
}

/// Lifted form used by the arithmetic: `n` values and the `n × m` Jacobian.
#[derive(Debug, Clone)]
pub(crate) struct Lifted {
    pub values: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub multi: bool,
}

impl Lifted {
    pub fn outputs(&self) -> usize {
        self.values.len()
    }

    /// Repeats a single output `n` times.
    pub fn broadcast(self, n: usize) -> Self {
        if self.outputs() == n {
            return self;
        }
        let value = self.values[0];
        let jacobian = &self.jacobian;
        Self {
            values: DVector::from_element(n, value),
            jacobian: DMatrix::from_fn(n, jacobian.ncols(), |_, j| jacobian[(0, j)]),
            multi: self.multi,
        }
    }
}

impl DualValue {
    /// A bare scalar: one variable, derivative 1.
    pub fn scalar(value: f64) -> Result<Self> {
        Self::new(value, 1.0)
    }

    /// General seeding with an explicit derivative.
    ///
    /// Equivalent spellings are normalized, so `(3.0, [1.0])` is stored the
    /// same way as `(3.0, 1.0)`.
    pub fn new(value: impl Into<Value>, derivative: impl Into<Derivative>) -> Result<Self> {
        let value = value.into();
        let derivative = derivative.into();
        check_real("value", value.iter())?;
        check_real("derivative", derivative.iter())?;
        let (derivative, variables) = canonical_derivative(&value, derivative)?;
        Ok(Self {
            value,
            derivative,
            variables,
        })
    }

    /// A constant over `variables` independent variables (zero derivative).
    pub fn constant(value: f64, variables: usize) -> Result<Self> {
        if variables == 0 {
            return Err(AdError::shape(
                "a constant must track at least one variable",
            ));
        }
        if variables == 1 {
            Self::new(value, 0.0)
        } else {
            Self::new(value, DVector::<f64>::zeros(variables))
        }
    }

    /// A bare scalar from any primitive number.
    pub fn from_primitive<N: ToPrimitive>(value: N) -> Result<Self> {
        let value = value
            .to_f64()
            .ok_or_else(|| AdError::NotNumeric("value has no f64 representation".into()))?;
        Self::scalar(value)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn derivative(&self) -> &Derivative {
        &self.derivative
    }

    /// Ambient number of independent variables (m).
    pub fn variables(&self) -> usize {
        self.variables
    }

    /// Number of function outputs (n).
    pub fn outputs(&self) -> usize {
        self.value.len()
    }

    pub fn is_multi_output(&self) -> bool {
        !self.value.is_scalar()
    }

    /// The derivative as an `n × m` matrix regardless of its stored shape.
    pub fn jacobian_matrix(&self) -> DMatrix<f64> {
        self.lift().jacobian
    }

    pub(crate) fn negated(&self) -> Self {
        let value = match &self.value {
            Value::Scalar(v) => Value::Scalar(-v),
            Value::Vector(v) => Value::Vector(-v.clone()),
        };
        let derivative = match &self.derivative {
            Derivative::Scalar(d) => Derivative::Scalar(-d),
            Derivative::Vector(d) => Derivative::Vector(-d.clone()),
            Derivative::Matrix(d) => Derivative::Matrix(-d.clone()),
        };
        Self {
            value,
            derivative,
            variables: self.variables,
        }
    }

    pub(crate) fn lift(&self) -> Lifted {
        let values = self.value.to_dvector();
        let jacobian = match (&self.value, &self.derivative) {
            (_, Derivative::Scalar(d)) => DMatrix::from_element(1, 1, *d),
            (Value::Scalar(_), Derivative::Vector(d)) => {
                DMatrix::from_row_slice(1, d.len(), d.as_slice())
            }
            (Value::Vector(_), Derivative::Vector(d)) => {
                DMatrix::from_column_slice(d.len(), 1, d.as_slice())
            }
            (_, Derivative::Matrix(d)) => d.clone(),
        };
        Lifted {
            values,
            jacobian,
            multi: self.is_multi_output(),
        }
    }

    /// Rebuilds a dual value from its lifted form, rejecting NaN/Inf produced
    /// by `operation`.
    pub(crate) fn lower(operation: &str, lifted: Lifted) -> Result<Self> {
        let Lifted {
            values,
            jacobian,
            multi,
        } = lifted;
        if values.iter().chain(jacobian.iter()).any(|v| !v.is_finite()) {
            return Err(AdError::domain(format!(
                "{} produced a non-finite result",
                operation
            )));
        }
        let variables = jacobian.ncols();
        let (value, derivative) = if multi {
            let derivative = if variables == 1 {
                Derivative::Vector(jacobian.column(0).into_owned())
            } else {
                Derivative::Matrix(jacobian)
            };
            (Value::Vector(values), derivative)
        } else {
            let derivative = if variables == 1 {
                Derivative::Scalar(jacobian[(0, 0)])
            } else {
                Derivative::Vector(jacobian.row(0).transpose())
            };
            (Value::Scalar(values[0]), derivative)
        };
        Ok(Self {
            value,
            derivative,
            variables,
        })
    }
}

fn check_real(what: &str, mut entries: impl Iterator<Item = f64>) -> Result<()> {
    match entries.find(|v| !v.is_finite()) {
        Some(bad) => Err(AdError::NotNumeric(format!(
            "{} contains {}, expected a finite real",
            what, bad
        ))),
        None => Ok(()),
    }
}

/// Returns the canonical derivative for `value` and the implied variable count.
fn canonical_derivative(value: &Value, derivative: Derivative) -> Result<(Derivative, usize)> {
    if value.is_empty() {
        return Err(AdError::shape("value has no entries"));
    }
    match (value, derivative) {
        (Value::Scalar(_), Derivative::Scalar(d)) => Ok((Derivative::Scalar(d), 1)),
        (Value::Scalar(_), Derivative::Vector(d)) => match d.len() {
            0 => Err(AdError::shape("derivative has no entries")),
            1 => Ok((Derivative::Scalar(d[0]), 1)),
            m => Ok((Derivative::Vector(d), m)),
        },
        (Value::Scalar(_), Derivative::Matrix(d)) => {
            if d.nrows() != 1 || d.ncols() == 0 {
                return Err(AdError::shape(format!(
                    "a scalar value takes a 1 x m derivative, got {} x {}",
                    d.nrows(),
                    d.ncols()
                )));
            }
            if d.ncols() == 1 {
                Ok((Derivative::Scalar(d[(0, 0)]), 1))
            } else {
                let m = d.ncols();
                Ok((Derivative::Vector(d.row(0).transpose()), m))
            }
        }
        (Value::Vector(v), Derivative::Scalar(d)) => {
            if v.len() != 1 {
                return Err(AdError::shape(format!(
                    "a value with {} outputs needs one derivative entry per output",
                    v.len()
                )));
            }
            Ok((Derivative::Vector(DVector::from_element(1, d)), 1))
        }
        (Value::Vector(v), Derivative::Vector(d)) => {
            if d.len() != v.len() {
                return Err(AdError::shape(format!(
                    "a value with {} outputs got a derivative of length {}",
                    v.len(),
                    d.len()
                )));
            }
            Ok((Derivative::Vector(d), 1))
        }
        (Value::Vector(v), Derivative::Matrix(d)) => {
            if d.nrows() != v.len() || d.ncols() == 0 {
                return Err(AdError::shape(format!(
                    "a value with {} outputs got a {} x {} derivative",
                    v.len(),
                    d.nrows(),
                    d.ncols()
                )));
            }
            if d.ncols() == 1 {
                Ok((Derivative::Vector(d.column(0).into_owned()), 1))
            } else {
                let m = d.ncols();
                Ok((Derivative::Matrix(d), m))
            }
        }
    }
}

// --- Conversions ---

impl TryFrom<f64> for DualValue {
    type Error = AdError;

    fn try_from(value: f64) -> Result<Self> {
        DualValue::scalar(value)
    }
}

impl TryFrom<(f64, f64)> for DualValue {
    type Error = AdError;

    fn try_from((value, derivative): (f64, f64)) -> Result<Self> {
        DualValue::new(value, derivative)
    }
}

impl TryFrom<(f64, Vec<f64>)> for DualValue {
    type Error = AdError;

    fn try_from((value, derivative): (f64, Vec<f64>)) -> Result<Self> {
        DualValue::new(value, derivative)
    }
}

impl TryFrom<(Vec<f64>, Vec<f64>)> for DualValue {
    type Error = AdError;

    fn try_from((value, derivative): (Vec<f64>, Vec<f64>)) -> Result<Self> {
        DualValue::new(value, derivative)
    }
}

impl TryFrom<(Vec<f64>, Vec<Vec<f64>>)> for DualValue {
    type Error = AdError;

    fn try_from((value, rows): (Vec<f64>, Vec<Vec<f64>>)) -> Result<Self> {
        DualValue::new(value, Derivative::from_rows(&rows)?)
    }
}

impl TryFrom<Vec<DualValue>> for DualValue {
    type Error = AdError;

    fn try_from(parts: Vec<DualValue>) -> Result<Self> {
        DualValue::assemble(&parts)
    }
}

impl TryFrom<&[DualValue]> for DualValue {
    type Error = AdError;

    fn try_from(parts: &[DualValue]) -> Result<Self> {
        DualValue::assemble(parts)
    }
}

// --- Serialization mirror ---

#[derive(Serialize, Deserialize)]
struct RawDual {
    value: RawValue,
    derivative: RawDerivative,
}

impl From<DualValue> for RawDual {
    fn from(dual: DualValue) -> Self {
        Self {
            value: dual.value.into(),
            derivative: dual.derivative.into(),
        }
    }
}

impl TryFrom<RawDual> for DualValue {
    type Error = AdError;

    fn try_from(raw: RawDual) -> Result<Self> {
        DualValue::new(Value::from(raw.value), Derivative::try_from(raw.derivative)?)
    }
}

// --- Comparisons ---

impl PartialEq<f64> for DualValue {
    fn eq(&self, other: &f64) -> bool {
        self.value.as_scalar() == Some(*other)
    }
}

impl PartialOrd for DualValue {
    /// Orders by value. Tied values only compare equal when the derivatives
    /// match as well.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let lhs = self.value.as_scalar()?;
        let rhs = other.value.as_scalar()?;
        match lhs.partial_cmp(&rhs)? {
            Ordering::Equal if self != other => None,
            ordering => Some(ordering),
        }
    }
}

impl PartialOrd<f64> for DualValue {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.value.as_scalar()?.partial_cmp(other)
    }
}
