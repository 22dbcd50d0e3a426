//! Error types for the trace sinks

use thiserror::Error;

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors raised while writing log artifacts
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
