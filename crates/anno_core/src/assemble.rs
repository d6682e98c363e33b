//! Stacking single-output dual values into a vector-valued function, and
//! seeding whole points.

use crate::dual::{DualValue, Lifted};
use crate::error::{AdError, Result};
use anyhow::{bail, Context};
use log::trace;
use nalgebra::{DMatrix, DVector};

impl DualValue {
    /// Stacks `n` single-output values sharing `m` variables into one value
    /// with `n` outputs and an `n × m` Jacobian. Row `i` is `parts[i]`.
    pub fn assemble(parts: &[DualValue]) -> Result<DualValue> {
        let first = parts
            .first()
            .ok_or_else(|| AdError::shape("cannot assemble an empty list of dual values"))?;
        let variables = first.variables();
        let mut values = DVector::<f64>::zeros(parts.len());
        let mut jacobian = DMatrix::<f64>::zeros(parts.len(), variables);

        for (i, part) in parts.iter().enumerate() {
            if part.is_multi_output() {
                return Err(AdError::shape(format!(
                    "input {} already has {} outputs; flatten it before assembling",
                    i,
                    part.outputs()
                )));
            }
            if part.variables() != variables {
                return Err(AdError::shape(format!(
                    "input {} tracks {} variable(s), input 0 tracks {}",
                    i,
                    part.variables(),
                    variables
                )));
            }
            let lifted = part.lift();
            values[i] = lifted.values[0];
            jacobian.set_row(i, &lifted.jacobian.row(0));
        }

        DualValue::lower(
            "assembly",
            Lifted {
                values,
                jacobian,
                multi: true,
            },
        )
    }
}

/// One seed per coordinate of `point`, each with a one-hot derivative.
///
/// A single coordinate gets the bare scalar seed (derivative 1).
pub fn seed_point(point: &[f64]) -> Result<Vec<DualValue>> {
    match point.len() {
        0 => Err(AdError::shape("cannot seed an empty point")),
        1 => Ok(vec![DualValue::scalar(point[0])?]),
        m => point
            .iter()
            .enumerate()
            .map(|(j, &x)| {
                let mut tangent = DVector::<f64>::zeros(m);
                tangent[j] = 1.0;
                DualValue::new(x, tangent)
            })
            .collect(),
    }
}

/// Evaluates a vector-valued `f` at `point` and returns its values with the
/// full Jacobian.
pub fn jacobian<F>(f: F, point: &[f64]) -> anyhow::Result<DualValue>
where
    F: FnOnce(&[DualValue]) -> anyhow::Result<Vec<DualValue>>,
{
    let seeds = seed_point(point).context("Failed to seed evaluation point.")?;
    trace!("seeded {} variable(s) for jacobian evaluation", seeds.len());
    let outputs = f(&seeds)?;
    let assembled = DualValue::assemble(&outputs).context("Failed to assemble function outputs.")?;
    Ok(assembled)
}

/// Evaluates a scalar-valued `f` at `point` and returns its value with the
/// gradient.
pub fn gradient<F>(f: F, point: &[f64]) -> anyhow::Result<DualValue>
where
    F: FnOnce(&[DualValue]) -> anyhow::Result<DualValue>,
{
    let seeds = seed_point(point).context("Failed to seed evaluation point.")?;
    trace!("seeded {} variable(s) for gradient evaluation", seeds.len());
    let output = f(&seeds)?;
    if output.is_multi_output() {
        bail!(
            "Gradient needs a single output, got {}.",
            output.outputs()
        );
    }
    Ok(output)
}
