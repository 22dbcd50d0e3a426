//! Error types for the transport crate

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by the transport layer
///
/// Send/receive failures are not represented here: the socket maps them to
/// the `598`/`599` pseudo status codes so the engine can classify them as
/// data rather than errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Invalid status code pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Request requires an auth token but no auth provider is configured")]
    NoToken,

    #[error("Auth token acquisition failed: {0}")]
    AuthFailed(String),
}
