//! Tagged shapes for the two halves of a dual value.
//!
//! A value is either a single real or a vector of `n` function outputs. The
//! derivative is a scalar, a vector (gradient row for a scalar value, or one
//! entry per output when there is a single variable) or an `n × m` Jacobian.
//! Which spelling applies is fixed by `(n, m)`; `DualValue` keeps the
//! canonical one.

use crate::error::{AdError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(DVector<f64>),
}

impl Value {
    /// Number of entries (1 for a scalar).
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Value::Scalar(_) => None,
            Value::Vector(v) => Some(v),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Vector(v) => v.iter().copied().collect(),
        }
    }

    pub(crate) fn to_dvector(&self) -> DVector<f64> {
        match self {
            Value::Scalar(v) => DVector::from_element(1, *v),
            Value::Vector(v) => v.clone(),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let (scalar, vector) = match self {
            Value::Scalar(v) => (Some(*v), None),
            Value::Vector(v) => (None, Some(v.iter().copied())),
        };
        scalar.into_iter().chain(vector.into_iter().flatten())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Value::Vector(DVector::from_vec(values))
    }
}

impl From<&[f64]> for Value {
    fn from(values: &[f64]) -> Self {
        Value::Vector(DVector::from_column_slice(values))
    }
}

impl From<DVector<f64>> for Value {
    fn from(values: DVector<f64>) -> Self {
        Value::Vector(values)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Derivative {
    Scalar(f64),
    Vector(DVector<f64>),
    Matrix(DMatrix<f64>),
}

impl Derivative {
    /// Builds a matrix derivative from row lists. Ragged rows are rejected.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let ncols = rows.first().map_or(0, Vec::len);
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
            return Err(AdError::shape(format!(
                "derivative row {} has {} entries, expected {}",
                idx,
                row.len(),
                ncols
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Ok(Derivative::Matrix(DMatrix::from_row_slice(
            rows.len(),
            ncols,
            &flat,
        )))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Derivative::Scalar(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Derivative::Vector(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&DMatrix<f64>> {
        match self {
            Derivative::Matrix(d) => Some(d),
            _ => None,
        }
    }

    /// Entries in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Derivative::Scalar(d) => vec![*d],
            Derivative::Vector(d) => d.iter().copied().collect(),
            Derivative::Matrix(d) => d.transpose().iter().copied().collect(),
        }
    }

    pub(crate) fn iter(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            Derivative::Scalar(d) => Box::new(std::iter::once(*d)),
            Derivative::Vector(d) => Box::new(d.iter().copied()),
            Derivative::Matrix(d) => Box::new(d.iter().copied()),
        }
    }
}

impl From<f64> for Derivative {
    fn from(value: f64) -> Self {
        Derivative::Scalar(value)
    }
}

impl From<Vec<f64>> for Derivative {
    fn from(values: Vec<f64>) -> Self {
        Derivative::Vector(DVector::from_vec(values))
    }
}

impl From<&[f64]> for Derivative {
    fn from(values: &[f64]) -> Self {
        Derivative::Vector(DVector::from_column_slice(values))
    }
}

impl From<DVector<f64>> for Derivative {
    fn from(values: DVector<f64>) -> Self {
        Derivative::Vector(values)
    }
}

impl From<DMatrix<f64>> for Derivative {
    fn from(values: DMatrix<f64>) -> Self {
        Derivative::Matrix(values)
    }
}

impl TryFrom<Vec<Vec<f64>>> for Derivative {
    type Error = AdError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        Derivative::from_rows(&rows)
    }
}

// Wire mirror: plain numbers, arrays and arrays of rows.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawDerivative {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Scalar(v) => RawValue::Scalar(v),
            Value::Vector(v) => RawValue::Vector(v.iter().copied().collect()),
        }
    }
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Scalar(v) => Value::Scalar(v),
            RawValue::Vector(v) => Value::from(v),
        }
    }
}

impl From<Derivative> for RawDerivative {
    fn from(derivative: Derivative) -> Self {
        match derivative {
            Derivative::Scalar(d) => RawDerivative::Scalar(d),
            Derivative::Vector(d) => RawDerivative::Vector(d.iter().copied().collect()),
            Derivative::Matrix(d) => RawDerivative::Matrix(
                d.row_iter()
                    .map(|row| row.iter().copied().collect())
                    .collect(),
            ),
        }
    }
}

impl TryFrom<RawDerivative> for Derivative {
    type Error = AdError;

    fn try_from(raw: RawDerivative) -> Result<Self> {
        match raw {
            RawDerivative::Scalar(d) => Ok(Derivative::Scalar(d)),
            RawDerivative::Vector(d) => Ok(Derivative::from(d)),
            RawDerivative::Matrix(rows) => Derivative::from_rows(&rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_builds_row_major_matrix() {
        let derivative = Derivative::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]])
            .expect("rows should form a matrix");
        let matrix = derivative.as_matrix().expect("matrix derivative");
        assert_eq!(matrix.nrows(), 2);
        assert_eq!(matrix[(0, 1)], 2.0);
        assert_eq!(matrix[(1, 0)], 3.0);
        assert_eq!(derivative.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let err = Derivative::from_rows(&[vec![1.0, 2.0], vec![3.0]])
            .expect_err("ragged rows should fail");
        assert!(matches!(err, AdError::ShapeMismatch(_)));
    }

    #[test]
    fn value_iterates_scalar_and_vector_entries() {
        assert_eq!(Value::Scalar(2.0).iter().collect::<Vec<_>>(), vec![2.0]);
        let vector = Value::from(vec![1.0, 5.0]);
        assert_eq!(vector.iter().collect::<Vec<_>>(), vec![1.0, 5.0]);
        assert_eq!(vector.len(), 2);
        assert!(vector.as_scalar().is_none());
    }
}
