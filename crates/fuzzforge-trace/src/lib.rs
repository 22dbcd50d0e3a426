//! # FuzzForge Trace
//!
//! Filesystem sinks for the FuzzForge engine: the per-worker plaintext
//! network log, the rotating ndjson trace database, and per-bucket replay
//! artifacts. All sinks redact auth material before writing.

pub mod error;
pub mod network_log;
pub mod replay_log;
pub mod trace_db;

pub use error::{Result, TraceError};
pub use network_log::{redact_tokens, NetworkLog};
pub use replay_log::{BucketIndexEntry, ReplayEntry, ReplayWriter};
pub use trace_db::{TraceDb, TraceRecord, TraceTags};
