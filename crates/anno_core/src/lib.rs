//! The `anno_core` crate is a forward-mode automatic differentiation engine.
//! It pairs every value with its exact derivative and propagates both through
//! arithmetic and elementary functions, so a single evaluation yields the
//! function value together with its gradient or Jacobian.
//!
//! Key components:
//! - **Dual values**: `DualValue` with tagged `Value`/`Derivative` shapes and a
//!   fixed number of tracked variables.
//! - **Operators**: `+ - * /`, constant and variable powers, and the
//!   elementary functions (`ln`, `log`, `exp`, `sqrt`, trigonometric,
//!   inverse trigonometric, hyperbolic, `logistic`).
//! - **Assembly**: stacking single-output values into a Jacobian, one-hot
//!   seeding of a point, `jacobian`/`gradient` drivers.
//! - **Expressions**: a small parser and bytecode VM that evaluates text
//!   equations over dual values.
//!
//! ```
//! use anno_core::DualValue;
//!
//! let x = DualValue::new(3.0, vec![1.0, 0.0])?;
//! let y = DualValue::new(2.0, vec![0.0, 1.0])?;
//! let f = DualValue::assemble(&[(&x + &y)?, (&x * &y)?])?;
//! assert_eq!(f.value().to_vec(), vec![5.0, 6.0]);
//! assert_eq!(f.derivative().to_vec(), vec![1.0, 1.0, 2.0, 3.0]);
//! # Ok::<(), anno_core::AdError>(())
//! ```
pub mod assemble;
pub mod display;
pub mod dual;
pub mod error;
pub mod expression;
pub mod functions;
pub mod ops;
pub mod shape;

pub use assemble::{gradient, jacobian, seed_point};
pub use dual::DualValue;
pub use error::{AdError, Result};
pub use expression::ExpressionSystem;
pub use shape::{Derivative, Value};
