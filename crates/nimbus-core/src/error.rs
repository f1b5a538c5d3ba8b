//! Error types for nimbus

use thiserror::Error;

/// nimbus error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error (domain errors, non-finite values)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Adaptive quadrature exhausted its subdivision budget.
    #[error("Quadrature did not converge: {0}")]
    Convergence(String),

    /// Survey filter id outside the recognized set.
    #[error("Unknown filter id {0} (expected 1=g, 2=r, 3=i)")]
    UnknownFilter(i64),

    /// Field foreground extinction above the analyzable threshold.
    #[error("Field {field} has high extinction (E(B-V) = {ebv} > {threshold}); aborting inference")]
    ExtinctionTooHigh {
        /// Survey field id.
        field: i64,
        /// Field E(B-V).
        ebv: f64,
        /// Configured threshold.
        threshold: f64,
    },
}

impl Error {
    /// Whether a retry with a larger quadrature budget may succeed.
    pub fn is_convergence(&self) -> bool {
        matches!(self, Error::Convergence(_))
    }

    /// Prefix a message-carrying error with `context`, keeping its variant.
    ///
    /// Structured variants are returned unchanged.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::Validation(msg) => Error::Validation(format!("{context}: {msg}")),
            Error::Computation(msg) => Error::Computation(format!("{context}: {msg}")),
            Error::Convergence(msg) => Error::Convergence(format!("{context}: {msg}")),
            other => other,
        }
    }
}


/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
