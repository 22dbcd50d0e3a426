//! Error types for the grammar crate

use thiserror::Error;

/// Result type alias for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

/// Errors raised while loading a grammar or enumerating candidate values
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("Failed to parse grammar file: {0}")]
    GrammarParse(String),

    #[error("Invalid dictionary: no candidate values for {0}")]
    InvalidDictionary(String),

    #[error("Request {request_id}: variable '{variable}' is both produced and consumed")]
    ProducerConsumerOverlap { request_id: String, variable: String },

    #[error("Combination id {0} is out of range")]
    CombinationOutOfRange(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
