//! Error type shared by every fallible operation in the crate.

use thiserror::Error;

/// Errors raised while configuring or initialising a chain.
///
/// Rejected proposals are never errors: a proposal outside the support of its
/// prior is simply not accepted.
#[derive(Debug, Error)]
pub enum McmcError {
    #[error("unsupported correlation function `{0}`; the only valid correlation functions are exponential and gaussian")]
    UnsupportedKernel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} is not positive definite")]
    NotPositiveDefinite(&'static str),

    #[error("partial correlation {index} is {value}, expected a value in (-1, 1)")]
    PartialCorrelationOutOfRange { index: usize, value: f64 },

    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, McmcError>;
