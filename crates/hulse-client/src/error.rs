//! Error types for the dispatch client.

use std::time::Duration;

use hulse_core::CoreError;
use thiserror::Error;

/// Errors that can occur when talking to the Hulse servers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Task kind is not in the supported set. Raised before any I/O.
    #[error("The task provided ({0}) is not supported.")]
    UnsupportedTask(String),

    /// Request could not be built from the given input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No credential configured for a call that needs one.
    #[error("no API key configured; run `hulse login` or pass --key")]
    MissingCredential,

    /// No producer is currently available to serve the query.
    #[error("No running cluster resource was found.")]
    ResourceUnavailable,

    /// Unexpected non-success status from a Hulse server.
    #[error("Received error code {status}.")]
    Server { status: u16 },

    /// Stream ended before a result frame arrived.
    #[error("stream ended without a result")]
    NoResult,

    /// Long-lived producer stream was closed.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// No result within the caller's deadline.
    #[error("no result within {0:?}")]
    Timeout(Duration),

    /// Local callback port is already taken.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Background listener task could not be joined.
    #[error("listener task failed: {0}")]
    ThreadControl(String),

    /// Operation not valid in the listener's current state.
    #[error("invalid listener state: {0}")]
    InvalidState(&'static str),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while reading a stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnsupportedTask(task) => Self::UnsupportedTask(task),
            CoreError::InvalidInput(msg) => Self::InvalidInput(msg),
        }
    }
}

/// Errors from running a single task on the local inference engine.
///
/// These never end the producer loop; the frame is logged and skipped.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Engine cannot run this task kind or model.
    #[error("unsupported task/model: {0}")]
    Unsupported(String),

    /// Engine process failed to start or crashed.
    #[error("failed to run engine: {0}")]
    Spawn(#[from] std::io::Error),

    /// Engine ran but reported failure.
    #[error("engine exited with error: {0}")]
    Failed(String),

    /// Engine output was not valid JSON.
    #[error("invalid engine output: {0}")]
    Output(#[from] serde_json::Error),
}
