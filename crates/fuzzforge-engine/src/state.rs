//! Engine context
//!
//! The engine has no global singletons: everything shared lives in one
//! context object. Mutable shared state (monitors, dependency table, bug
//! buckets, checker dedup sets) sits behind a single mutex, matching the
//! coarse lock of the concurrency model; immutable configuration is shared
//! through `Arc`s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use fuzzforge_grammar::{CandidateValuesPool, RequestCollection};
use fuzzforge_trace::{ReplayWriter, TraceDb};
use fuzzforge_transport::{BugCodeSettings, TokenCache};

use crate::bug_buckets::BugBuckets;
use crate::checkers::payload_body::PayloadBodyBuckets;
use crate::dependencies::DependencyTable;
use crate::error::Result;
use crate::monitors::FuzzingMonitor;
use crate::sequences::SentRequestData;
use crate::settings::EngineSettings;
use crate::speccov::SpecCovTracker;

/// Cross-worker checker bookkeeping
#[derive(Debug, Default)]
pub struct CheckerSharedState {
    /// (checker, generation) -> request hexes already probed
    per_generation: HashMap<(String, u64), HashSet<String>>,
    /// checker -> keys probed once for the whole run
    per_run: HashMap<String, HashSet<String>>,
}

impl CheckerSharedState {
    /// Returns true the first time a (checker, generation, request) triple
    /// is seen.
    pub fn mark_generation_executed(
        &mut self,
        checker: &str,
        generation: u64,
        request_hex: &str,
    ) -> bool {
        self.per_generation
            .entry((checker.to_string(), generation))
            .or_default()
            .insert(request_hex.to_string())
    }

    /// Returns true the first time a (checker, key) pair is seen.
    pub fn mark_tested(&mut self, checker: &str, key: &str) -> bool {
        self.per_run.entry(checker.to_string()).or_default().insert(key.to_string())
    }
}

/// Everything mutable behind the shared lock
pub struct SharedState {
    pub monitor: FuzzingMonitor,
    pub dependencies: DependencyTable,
    pub bug_buckets: BugBuckets,
    pub speccov: SpecCovTracker,
    pub payload_buckets: PayloadBodyBuckets,
    pub checker_state: CheckerSharedState,
    /// Sent data of preprocessing create-once requests, prepended to replays
    pub create_once_data: Vec<SentRequestData>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            monitor: FuzzingMonitor::new(),
            dependencies: DependencyTable::new(),
            bug_buckets: BugBuckets::new(),
            speccov: SpecCovTracker::new(),
            payload_buckets: PayloadBodyBuckets::new(),
            checker_state: CheckerSharedState::default(),
            create_once_data: Vec::new(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Filesystem sinks shared by all workers
pub struct TraceSinks {
    pub trace_db: Option<TraceDb>,
    pub replay: Option<ReplayWriter>,
    pub logs_dir: Option<std::path::PathBuf>,
}

impl TraceSinks {
    /// No sinks at all; unit tests mostly run with this.
    pub fn disabled() -> Self {
        Self { trace_db: None, replay: None, logs_dir: None }
    }
}

/// The engine-level context handed to the driver, workers, and checkers
#[derive(Clone)]
pub struct FuzzingContext {
    pub state: Arc<Mutex<SharedState>>,
    pub collection: Arc<RequestCollection>,
    pub pool: Arc<CandidateValuesPool>,
    pub settings: Arc<EngineSettings>,
    pub bug_codes: Arc<BugCodeSettings>,
    pub auth: Arc<TokenCache>,
    pub sinks: Arc<TraceSinks>,
}

impl FuzzingContext {
    /// Build a context with sinks under the settings' output directory.
    pub fn new(
        collection: RequestCollection,
        pool: CandidateValuesPool,
        settings: EngineSettings,
        auth: TokenCache,
    ) -> Result<Self> {
        let bug_codes =
            BugCodeSettings::from_patterns(&settings.custom_bug_codes, &settings.custom_non_bug_codes)?;
        let trace_db = if settings.trace_database {
            Some(TraceDb::open(&settings.trace_db_path())?)
        } else {
            None
        };
        let replay = Some(ReplayWriter::create(&settings.bug_buckets_dir())?);
        let logs_dir = Some(settings.logs_dir());

        Ok(Self {
            state: Arc::new(Mutex::new(SharedState::new())),
            collection: Arc::new(collection),
            pool: Arc::new(pool),
            settings: Arc::new(settings),
            bug_codes: Arc::new(bug_codes),
            auth: Arc::new(auth),
            sinks: Arc::new(TraceSinks { trace_db, replay, logs_dir }),
        })
    }

    /// A context without filesystem sinks, for tests.
    pub fn without_sinks(
        collection: RequestCollection,
        pool: CandidateValuesPool,
        settings: EngineSettings,
        auth: TokenCache,
    ) -> Result<Self> {
        let bug_codes =
            BugCodeSettings::from_patterns(&settings.custom_bug_codes, &settings.custom_non_bug_codes)?;
        Ok(Self {
            state: Arc::new(Mutex::new(SharedState::new())),
            collection: Arc::new(collection),
            pool: Arc::new(pool),
            settings: Arc::new(settings),
            bug_codes: Arc::new(bug_codes),
            auth: Arc::new(auth),
            sinks: Arc::new(TraceSinks::disabled()),
        })
    }
}
