//! Error types for the engine
//!
//! Transport and parse failures during fuzzing are classifications, not
//! errors; only conditions that stop a worker or the whole run surface here.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that abort a worker or the run
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Grammar(#[from] fuzzforge_grammar::GrammarError),

    #[error(transparent)]
    Transport(#[from] fuzzforge_transport::TransportError),

    #[error(transparent)]
    Trace(#[from] fuzzforge_trace::TraceError),

    /// Cooperative cancellation: the wall-clock time budget elapsed.
    #[error("Time budget exhausted")]
    TimeBudgetExceeded,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Worker {0} panicked")]
    WorkerPanic(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error is the cooperative end-of-budget signal rather
    /// than a real failure.
    pub fn is_time_budget(&self) -> bool {
        matches!(self, Self::TimeBudgetExceeded)
    }
}
