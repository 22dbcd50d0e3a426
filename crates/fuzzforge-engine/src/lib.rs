//! # FuzzForge Engine
//!
//! The stateful fuzzing engine: given a request grammar and a mutations
//! dictionary, it synthesizes request sequences generation by generation,
//! propagates dynamically created resource ids from producers to consumers,
//! runs security checkers over every rendered sequence, and buckets
//! bug-indicating responses with replayable payloads.
//!
//! ## Overview
//!
//! - **Dependency table**: producer variable bindings with a no-gc overlay
//! - **Sequences**: request lists plus the record of what was sent
//! - **Monitors**: rendering validity, status code history, clock and budget
//! - **Driver**: breadth-first generation expansion with worker fan-out
//! - **Checkers**: leakage, resource hierarchy, use-after-free, namespace,
//!   invalid dynamic object, payload body, examples
//! - **Bug buckets**: deduplication, reproduction, replay artifacts
//! - **Garbage collector**: caps live dynamic objects per type

pub mod async_poll;
pub mod bug_buckets;
pub mod checkers;
pub mod dependencies;
pub mod driver;
pub mod error;
pub mod executor;
pub mod gc;
pub mod monitors;
pub mod sequences;
pub mod settings;
pub mod speccov;
pub mod state;

pub use bug_buckets::{bucket_origin, bug_hash, BugBucketEntry, BugBuckets};
pub use checkers::{apply_checkers, build_checkers, Checker};
pub use dependencies::{DependencyMiss, DependencyTable};
pub use driver::{generate_sequences, render_sequence, FuzzingSummary};
pub use error::{EngineError, Result};
pub use executor::{Identity, ParseOutcome, PositionOutcome, RequestExecutor};
pub use monitors::{FuzzingMonitor, RenderingsMonitor, StatusCodesMonitor};
pub use sequences::{RenderFailureKind, RenderedSequence, SentRequestData, Sequence};
pub use settings::{CheckerMode, CheckerSettings, EngineSettings, GcSettings};
pub use speccov::{CoverageOutcome, SpecCovTracker};
pub use state::{FuzzingContext, SharedState, TraceSinks};
