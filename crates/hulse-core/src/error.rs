//! Core domain errors.

use thiserror::Error;

/// Core domain errors for Hulse.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task kind is not part of the supported set.
    #[error("The task provided ({0}) is not supported.")]
    UnsupportedTask(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
