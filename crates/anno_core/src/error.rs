use thiserror::Error;

/// Errors raised by dual-value construction and propagation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdError {
    /// Operands disagree on the number of variables or outputs, or a
    /// derivative does not fit the value it is attached to.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// An argument lies outside the real domain of the operation.
    #[error("Domain error: {0}")]
    Domain(String),
    /// A construction input is not a usable real number.
    #[error("Not a number: {0}")]
    NotNumeric(String),
}

pub type Result<T> = std::result::Result<T, AdError>;

impl AdError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        AdError::ShapeMismatch(message.into())
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        AdError::Domain(message.into())
    }
}
