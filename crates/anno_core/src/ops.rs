//! Arithmetic on dual values.
//!
//! Every binary operator goes through [`DualValue::binary`]: plain `f64`
//! operands are first promoted to a zero-derivative constant with the other
//! operand's variable count, so each rule is written once regardless of
//! operand order.
//!
//! - `(a + ∇a) ± (b + ∇b) = (a ± b) + (∇a ± ∇b)`
//! - `(a + ∇a) * (b + ∇b) = ab + (b∇a + a∇b)`
//! - `(a + ∇a) / (b + ∇b) = a/b + (b∇a − a∇b)/b²`

use crate::dual::{DualValue, Lifted};
use crate::error::{AdError, Result};
use nalgebra::{DMatrix, DVector};
use num_traits::Pow;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "addition",
            BinaryOp::Sub => "subtraction",
            BinaryOp::Mul => "multiplication",
            BinaryOp::Div => "division",
        }
    }
}

impl DualValue {
    /// Lifts both operands to a common output count after checking that they
    /// track the same variables. A single-output operand is broadcast.
    pub(crate) fn align(&self, rhs: &DualValue, operation: &str) -> Result<(Lifted, Lifted)> {
        if self.variables() != rhs.variables() {
            return Err(AdError::shape(format!(
                "{}: left operand tracks {} variable(s), right operand tracks {}",
                operation,
                self.variables(),
                rhs.variables()
            )));
        }
        let (lhs, rhs_lifted) = (self.lift(), rhs.lift());
        let n = match (lhs.outputs(), rhs_lifted.outputs()) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            (a, b) => {
                return Err(AdError::shape(format!(
                    "{}: cannot combine {} outputs with {} outputs",
                    operation, a, b
                )))
            }
        };
        Ok((lhs.broadcast(n), rhs_lifted.broadcast(n)))
    }

    /// Promotes a real constant to this value's ambient shape.
    pub(crate) fn promote(&self, constant: f64) -> Result<DualValue> {
        DualValue::constant(constant, self.variables())
    }

    pub(crate) fn binary(&self, rhs: &DualValue, op: BinaryOp) -> Result<DualValue> {
        let (u, v) = self.align(rhs, op.name())?;
        let multi = u.multi || v.multi;
        let (values, jacobian) = match op {
            BinaryOp::Add => (&u.values + &v.values, &u.jacobian + &v.jacobian),
            BinaryOp::Sub => (&u.values - &v.values, &u.jacobian - &v.jacobian),
            BinaryOp::Mul => {
                let jacobian = DMatrix::from_fn(u.outputs(), u.jacobian.ncols(), |i, j| {
                    u.jacobian[(i, j)] * v.values[i] + u.values[i] * v.jacobian[(i, j)]
                });
                (u.values.component_mul(&v.values), jacobian)
            }
            BinaryOp::Div => {
                if v.values.iter().any(|&d| d == 0.0) {
                    return Err(AdError::domain("division by zero"));
                }
                let jacobian = DMatrix::from_fn(u.outputs(), u.jacobian.ncols(), |i, j| {
                    (u.jacobian[(i, j)] * v.values[i] - u.values[i] * v.jacobian[(i, j)])
                        / (v.values[i] * v.values[i])
                });
                (u.values.component_div(&v.values), jacobian)
            }
        };
        DualValue::lower(
            op.name(),
            Lifted {
                values,
                jacobian,
                multi,
            },
        )
    }

    /// Applies `f` to every output and scales each Jacobian row by `df`.
    pub(crate) fn map_unary(
        &self,
        operation: &str,
        f: impl Fn(f64) -> f64,
        df: impl Fn(f64) -> f64,
    ) -> Result<DualValue> {
        let mut lifted = self.lift();
        for (i, x) in lifted.values.iter_mut().enumerate() {
            let slope = df(*x);
            for entry in lifted.jacobian.row_mut(i).iter_mut() {
                *entry *= slope;
            }
            *x = f(*x);
        }
        DualValue::lower(operation, lifted)
    }

    /// Fails with a domain error unless every output satisfies `accept`.
    pub(crate) fn require(
        &self,
        operation: &str,
        accept: impl Fn(f64) -> bool,
        reason: &str,
    ) -> Result<()> {
        match self.value().iter().find(|&x| !accept(x)) {
            Some(x) => Err(AdError::domain(format!(
                "{} at {}: {}",
                operation, x, reason
            ))),
            None => Ok(()),
        }
    }

    /// Power with a constant exponent: `d(u^p) = p·u^(p−1)·du`.
    pub fn powf(&self, exponent: f64) -> Result<DualValue> {
        if !exponent.is_finite() {
            return Err(AdError::NotNumeric(format!(
                "exponent {} is not a finite real",
                exponent
            )));
        }
        if exponent == 0.0 {
            return self.map_unary("power", |_| 1.0, |_| 0.0);
        }
        if exponent.fract() != 0.0 {
            self.require(
                "power",
                |x| x >= 0.0,
                "a negative base needs an integer exponent",
            )?;
        }
        if exponent < 1.0 {
            self.require(
                "power",
                |x| x != 0.0,
                "zero base with an exponent below one is unbounded",
            )?;
        }
        self.map_unary(
            "power",
            |x| x.powf(exponent),
            |x| exponent * x.powf(exponent - 1.0),
        )
    }

    /// Integer power, same rule as [`DualValue::powf`].
    pub fn powi(&self, exponent: i32) -> Result<DualValue> {
        if exponent == 0 {
            return self.map_unary("power", |_| 1.0, |_| 0.0);
        }
        if exponent < 0 {
            self.require(
                "power",
                |x| x != 0.0,
                "zero base with a negative exponent is unbounded",
            )?;
        }
        self.map_unary(
            "power",
            |x| x.powi(exponent),
            |x| {
                let p = f64::from(exponent);
                p * x.powf(p - 1.0)
            },
        )
    }

    /// Power with a dual exponent:
    /// `d(u^v) = u^v · (dv·ln u + v·du/u)`, defined for `u > 0`.
    pub fn powd(&self, exponent: &DualValue) -> Result<DualValue> {
        self.require(
            "power",
            |x| x > 0.0,
            "a variable exponent needs a positive base",
        )?;
        let (u, v) = self.align(exponent, "power")?;
        let multi = u.multi || v.multi;
        let n = u.outputs();
        let powered: Vec<f64> = (0..n).map(|i| u.values[i].powf(v.values[i])).collect();
        let jacobian = DMatrix::from_fn(n, u.jacobian.ncols(), |i, j| {
            powered[i]
                * (v.jacobian[(i, j)] * u.values[i].ln()
                    + v.values[i] * u.jacobian[(i, j)] / u.values[i])
        });
        DualValue::lower(
            "power",
            Lifted {
                values: DVector::from_vec(powered),
                jacobian,
                multi,
            },
        )
    }

    /// A constant base raised to a dual exponent: `d(b^v) = b^v · ln b · dv`.
    ///
    /// The base must be positive, as for [`DualValue::powd`].
    pub fn rpow(base: f64, exponent: &DualValue) -> Result<DualValue> {
        if !base.is_finite() {
            return Err(AdError::NotNumeric(format!(
                "base {} is not a finite real",
                base
            )));
        }
        if base <= 0.0 {
            return Err(AdError::domain(format!(
                "power with base {}: a variable exponent needs a positive base",
                base
            )));
        }
        let ln_base = base.ln();
        exponent.map_unary("power", |x| base.powf(x), |x| base.powf(x) * ln_base)
    }
}

impl Neg for &DualValue {
    type Output = DualValue;

    fn neg(self) -> DualValue {
        self.negated()
    }
}

impl Neg for DualValue {
    type Output = DualValue;

    fn neg(self) -> DualValue {
        -&self
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<&DualValue> for &DualValue {
            type Output = Result<DualValue>;

            fn $method(self, rhs: &DualValue) -> Result<DualValue> {
                self.binary(rhs, $op)
            }
        }

        impl $trait<DualValue> for &DualValue {
            type Output = Result<DualValue>;

            fn $method(self, rhs: DualValue) -> Result<DualValue> {
                self.binary(&rhs, $op)
            }
        }

        impl $trait<&DualValue> for DualValue {
            type Output = Result<DualValue>;

            fn $method(self, rhs: &DualValue) -> Result<DualValue> {
                self.binary(rhs, $op)
            }
        }

        impl $trait<DualValue> for DualValue {
            type Output = Result<DualValue>;

            fn $method(self, rhs: DualValue) -> Result<DualValue> {
                self.binary(&rhs, $op)
            }
        }

        impl $trait<f64> for &DualValue {
            type Output = Result<DualValue>;

            fn $method(self, rhs: f64) -> Result<DualValue> {
                self.binary(&self.promote(rhs)?, $op)
            }
        }

        impl $trait<f64> for DualValue {
            type Output = Result<DualValue>;

            fn $method(self, rhs: f64) -> Result<DualValue> {
                self.binary(&self.promote(rhs)?, $op)
            }
        }

        impl $trait<&DualValue> for f64 {
            type Output = Result<DualValue>;

            fn $method(self, rhs: &DualValue) -> Result<DualValue> {
                rhs.promote(self)?.binary(rhs, $op)
            }
        }

        impl $trait<DualValue> for f64 {
            type Output = Result<DualValue>;

            fn $method(self, rhs: DualValue) -> Result<DualValue> {
                rhs.promote(self)?.binary(&rhs, $op)
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);

macro_rules! pow_operator {
    ($receiver:ty) => {
        impl Pow<f64> for $receiver {
            type Output = Result<DualValue>;

            fn pow(self, exponent: f64) -> Result<DualValue> {
                self.powf(exponent)
            }
        }

        impl Pow<i32> for $receiver {
            type Output = Result<DualValue>;

            fn pow(self, exponent: i32) -> Result<DualValue> {
                self.powi(exponent)
            }
        }

        impl Pow<&DualValue> for $receiver {
            type Output = Result<DualValue>;

            fn pow(self, exponent: &DualValue) -> Result<DualValue> {
                self.powd(exponent)
            }
        }

        impl Pow<DualValue> for $receiver {
            type Output = Result<DualValue>;

            fn pow(self, exponent: DualValue) -> Result<DualValue> {
                self.powd(&exponent)
            }
        }
    };
}

pow_operator!(&DualValue);
pow_operator!(DualValue);

impl Pow<&DualValue> for f64 {
    type Output = Result<DualValue>;

    fn pow(self, exponent: &DualValue) -> Result<DualValue> {
        DualValue::rpow(self, exponent)
    }
}

impl Pow<DualValue> for f64 {
    type Output = Result<DualValue>;

    fn pow(self, exponent: DualValue) -> Result<DualValue> {
        DualValue::rpow(self, &exponent)
    }
}
