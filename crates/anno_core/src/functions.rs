//! Elementary functions of a dual value.
//!
//! Each function applies `d f(u) = f'(u)·du` row by row. Domain-restricted
//! functions check every output before evaluating.

use crate::dual::DualValue;
use crate::error::{AdError, Result};
use std::f64::consts::PI;

impl DualValue {
    /// Natural logarithm.
    pub fn ln(&self) -> Result<DualValue> {
        self.require("ln", |x| x > 0.0, "logarithm is defined for positive numbers only")?;
        self.map_unary("ln", f64::ln, |x| 1.0 / x)
    }

    /// Logarithm in an arbitrary base: `d log_b(u) = du / (u ln b)`.
    pub fn log(&self, base: f64) -> Result<DualValue> {
        if !(base.is_finite() && base > 0.0 && base != 1.0) {
            return Err(AdError::domain(format!(
                "log: base {} must be positive and different from 1",
                base
            )));
        }
        self.require("log", |x| x > 0.0, "logarithm is defined for positive numbers only")?;
        let ln_base = base.ln();
        self.map_unary("log", |x| x.ln() / ln_base, |x| 1.0 / (x * ln_base))
    }

    pub fn log2(&self) -> Result<DualValue> {
        self.log(2.0)
    }

    pub fn log10(&self) -> Result<DualValue> {
        self.log(10.0)
    }

    pub fn exp(&self) -> Result<DualValue> {
        self.map_unary("exp", f64::exp, f64::exp)
    }

    /// `base^u` for a constant base.
    pub fn exp_base(&self, base: f64) -> Result<DualValue> {
        DualValue::rpow(base, self)
    }

    /// Square root. Zero is rejected because the slope is unbounded there.
    pub fn sqrt(&self) -> Result<DualValue> {
        self.require("sqrt", |x| x >= 0.0, "square root of a negative number")?;
        self.require("sqrt", |x| x != 0.0, "derivative of sqrt is unbounded at 0")?;
        self.map_unary("sqrt", f64::sqrt, |x| 0.5 / x.sqrt())
    }

    pub fn sin(&self) -> Result<DualValue> {
        self.map_unary("sin", f64::sin, f64::cos)
    }

    pub fn cos(&self) -> Result<DualValue> {
        self.map_unary("cos", f64::cos, |x| -x.sin())
    }

    /// Tangent, undefined at `(k + 1/2)π`.
    pub fn tan(&self) -> Result<DualValue> {
        self.require(
            "tan",
            |x| (x / PI - 0.5).rem_euclid(1.0) != 0.0,
            "tangent is undefined at (k + 1/2)π",
        )?;
        self.map_unary("tan", f64::tan, |x| {
            let secant = 1.0 / x.cos();
            secant * secant
        })
    }

    pub fn arcsin(&self) -> Result<DualValue> {
        self.require("arcsin", |x| (-1.0..=1.0).contains(&x), "arcsin is defined on [-1, 1]")?;
        self.require("arcsin", |x| x.abs() != 1.0, "derivative of arcsin is unbounded at ±1")?;
        self.map_unary("arcsin", f64::asin, |x| 1.0 / (1.0 - x * x).sqrt())
    }

    pub fn arccos(&self) -> Result<DualValue> {
        self.require("arccos", |x| (-1.0..=1.0).contains(&x), "arccos is defined on [-1, 1]")?;
        self.require("arccos", |x| x.abs() != 1.0, "derivative of arccos is unbounded at ±1")?;
        self.map_unary("arccos", f64::acos, |x| -1.0 / (1.0 - x * x).sqrt())
    }

    pub fn arctan(&self) -> Result<DualValue> {
        self.map_unary("arctan", f64::atan, |x| 1.0 / (1.0 + x * x))
    }

    pub fn sinh(&self) -> Result<DualValue> {
        self.map_unary("sinh", f64::sinh, f64::cosh)
    }

    pub fn cosh(&self) -> Result<DualValue> {
        self.map_unary("cosh", f64::cosh, f64::sinh)
    }

    pub fn tanh(&self) -> Result<DualValue> {
        self.map_unary("tanh", f64::tanh, |x| {
            let sech = 1.0 / x.cosh();
            sech * sech
        })
    }

    /// Logistic sigmoid `1 / (1 + e^-u)`, slope `σ(1 − σ)`.
    pub fn logistic(&self) -> Result<DualValue> {
        let sigma = |x: f64| 1.0 / (1.0 + (-x).exp());
        self.map_unary("logistic", sigma, |x| {
            let s = sigma(x);
            s * (1.0 - s)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Derivative;

    const TOL: f64 = 1e-12;

    fn scalar(x: f64) -> DualValue {
        DualValue::scalar(x).expect("scalar seed")
    }

    fn value_of(d: &DualValue) -> f64 {
        d.value().as_scalar().expect("scalar output")
    }

    fn slope_of(d: &DualValue) -> f64 {
        d.derivative().as_scalar().expect("scalar derivative")
    }

    fn assert_domain(result: Result<DualValue>) {
        match result {
            Err(AdError::Domain(_)) => {}
            other => panic!("expected a domain error, got {other:?}"),
        }
    }

    #[test]
    fn log_base_two_plus_arctan() {
        let x = scalar(10.0);
        let inner = ((3.0 * &x).unwrap() + 5.0).unwrap();
        let f = (x.log(2.0).unwrap() + inner.arctan().unwrap()).unwrap();
        assert!((value_of(&f) - 4.864160763843499).abs() < TOL);
        assert!((slope_of(&f) - 0.14671648614436125).abs() < TOL);
    }

    #[test]
    fn derivatives_match_closed_forms() {
        let x = 0.3;
        let u = scalar(x);
        let cases: Vec<(&str, Result<DualValue>, f64, f64)> = vec![
            ("ln", u.ln(), x.ln(), 1.0 / x),
            ("exp", u.exp(), x.exp(), x.exp()),
            ("sqrt", u.sqrt(), x.sqrt(), 0.5 / x.sqrt()),
            ("sin", u.sin(), x.sin(), x.cos()),
            ("cos", u.cos(), x.cos(), -x.sin()),
            ("tan", u.tan(), x.tan(), 1.0 / (x.cos() * x.cos())),
            ("arcsin", u.arcsin(), x.asin(), 1.0 / (1.0 - x * x).sqrt()),
            ("arccos", u.arccos(), x.acos(), -1.0 / (1.0 - x * x).sqrt()),
            ("arctan", u.arctan(), x.atan(), 1.0 / (1.0 + x * x)),
            ("sinh", u.sinh(), x.sinh(), x.cosh()),
            ("cosh", u.cosh(), x.cosh(), x.sinh()),
            ("tanh", u.tanh(), x.tanh(), 1.0 / (x.cosh() * x.cosh())),
            ("log10", u.log10(), x.log10(), 1.0 / (x * 10.0_f64.ln())),
        ];
        for (name, result, value, slope) in cases {
            let f = result.unwrap_or_else(|err| panic!("{name} failed: {err}"));
            assert!((value_of(&f) - value).abs() < TOL, "{name} value");
            assert!((slope_of(&f) - slope).abs() < TOL, "{name} slope");
        }
    }

    #[test]
    fn chain_rule_scales_gradient_rows() {
        let u = DualValue::new(0.5, vec![2.0, -1.0]).unwrap();
        let f = u.sin().unwrap();
        let expected = [2.0 * 0.5_f64.cos(), -0.5_f64.cos()];
        for (got, want) in f.derivative().to_vec().iter().zip(expected) {
            assert!((got - want).abs() < TOL);
        }
    }

    #[test]
    fn logistic_is_stable_for_large_inputs() {
        let f = scalar(0.0).logistic().unwrap();
        assert_eq!(value_of(&f), 0.5);
        assert_eq!(slope_of(&f), 0.25);
        let far = scalar(800.0).logistic().unwrap();
        assert_eq!(value_of(&far), 1.0);
        assert_eq!(slope_of(&far), 0.0);
    }

    #[test]
    fn exp_base_matches_power_of_constant() {
        let x = scalar(3.0);
        let f = x.exp_base(2.0).unwrap();
        assert!((value_of(&f) - 8.0).abs() < TOL);
        assert!((slope_of(&f) - 8.0 * 2.0_f64.ln()).abs() < TOL);
    }

    #[test]
    fn domain_violations_are_reported() {
        assert_domain(scalar(0.0).ln());
        assert_domain(scalar(-1.0).log(2.0));
        assert_domain(scalar(4.0).log(1.0));
        assert_domain(scalar(4.0).log(-3.0));
        assert_domain(scalar(-4.0).sqrt());
        assert_domain(scalar(0.0).sqrt());
        assert_domain(scalar(1.5).arcsin());
        assert_domain(scalar(-1.5).arccos());
        assert_domain(scalar(1.0).arcsin());
        assert_domain(scalar(-1.0).arccos());
        assert_domain(scalar(PI / 2.0).tan());
        assert_domain(scalar(-PI / 2.0).tan());
        assert_domain(scalar(1000.0).exp());
    }

    #[test]
    fn unary_functions_scale_every_jacobian_row() {
        let x = DualValue::new(3.0, vec![1.0, 0.0]).unwrap();
        let y = DualValue::new(2.0, vec![0.0, 1.0]).unwrap();
        let f = DualValue::assemble(&[(&x + &y).unwrap(), (&x * &y).unwrap()]).unwrap();
        let g = f.sin().unwrap();
        assert_eq!(g.value().to_vec(), vec![5.0_f64.sin(), 6.0_f64.sin()]);
        let expected = [
            5.0_f64.cos(),
            5.0_f64.cos(),
            2.0 * 6.0_f64.cos(),
            3.0 * 6.0_f64.cos(),
        ];
        let jacobian = g.derivative().as_matrix().expect("matrix derivative");
        assert_eq!((jacobian.nrows(), jacobian.ncols()), (2, 2));
        for (got, want) in g.derivative().to_vec().iter().zip(expected) {
            assert!((got - want).abs() < TOL);
        }

        let shifted = (&f - 5.5).unwrap();
        assert_domain(shifted.ln());
    }

    #[test]
    fn vector_outputs_are_checked_elementwise() {
        let f = DualValue::new(vec![4.0, -1.0], vec![1.0, 1.0]).unwrap();
        assert_domain(f.sqrt());
        let g = DualValue::new(vec![4.0, 9.0], vec![1.0, 1.0]).unwrap();
        let root = g.sqrt().unwrap();
        assert_eq!(root.value().to_vec(), vec![2.0, 3.0]);
        assert_eq!(
            root.derivative(),
            &Derivative::Vector(nalgebra::DVector::from_vec(vec![0.25, 1.0 / 6.0]))
        );
    }
}
