//! Engine settings
//!
//! Loaded from a JSON settings file and overridden by CLI flags. Everything
//! has a default so a minimal `{}` settings file is a valid run
//! configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fuzzforge_transport::ConnectionSettings;

use crate::error::{EngineError, Result};

/// Checker execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerMode {
    /// Stop after the first probe per target
    #[default]
    Normal,
    /// Probe every applicable target
    Exhaustive,
}

/// Per-checker settings from the settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckerSettings {
    /// Override the checker's built-in enabled default
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub mode: CheckerMode,
    /// Free-form checker arguments (e.g. custom invalid object strings)
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
}

/// Garbage collection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcSettings {
    /// Cap on live dynamic objects per type
    pub max_objects_per_type: usize,
    /// Interval of the background collection pass between generations
    pub interval_secs: u64,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self { max_objects_per_type: 10, interval_secs: 30 }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub connection: ConnectionSettings,
    /// Wall-clock budget for the whole run
    pub time_budget_hours: f64,
    /// Maximum sequence length (generations) to explore
    pub max_sequence_length: u64,
    /// Number of parallel fuzzing workers
    pub fuzzing_jobs: usize,
    /// Cap on rendering combinations per request
    pub max_combinations: u64,
    /// Skip combinations that were invalid across the previous generation
    pub memoize_invalid_past_renderings: bool,
    /// Default wait for asynchronous resource creation
    pub max_async_resource_creation_time_secs: u64,
    /// Per-request-id overrides of the async creation wait
    pub per_resource_max_async_wait_secs: HashMap<String, u64>,
    /// Status code patterns to treat as bugs in addition to 5xx
    pub custom_bug_codes: Vec<String>,
    /// When non-empty, only codes matching these patterns are not bugs
    pub custom_non_bug_codes: Vec<String>,
    /// Per-checker configuration, keyed by friendly name
    pub checkers: HashMap<String, CheckerSettings>,
    pub garbage_collection: GcSettings,
    /// Replay bug sequences to verify reproducibility
    pub reproduce_bugs: bool,
    /// Write the ndjson trace database
    pub trace_database: bool,
    /// Root directory for logs, bug buckets, and speccov output
    pub output_dir: PathBuf,
    /// Auth token lifetime before a refresh is forced
    pub token_refresh_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            time_budget_hours: 24.0 * 30.0,
            max_sequence_length: 100,
            fuzzing_jobs: 1,
            max_combinations: 20,
            memoize_invalid_past_renderings: false,
            max_async_resource_creation_time_secs: 30,
            per_resource_max_async_wait_secs: HashMap::new(),
            custom_bug_codes: Vec::new(),
            custom_non_bug_codes: Vec::new(),
            checkers: HashMap::new(),
            garbage_collection: GcSettings::default(),
            reproduce_bugs: true,
            trace_database: true,
            output_dir: PathBuf::from("fuzzforge-results"),
            token_refresh_interval_secs: 300,
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Settings(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| EngineError::Settings(e.to_string()))
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs_f64(self.time_budget_hours * 3600.0)
    }

    /// Whether a checker runs, given its built-in default.
    pub fn checker_enabled(&self, friendly_name: &str, default: bool) -> bool {
        self.checkers
            .get(friendly_name)
            .and_then(|c| c.enabled)
            .unwrap_or(default)
    }

    pub fn checker_mode(&self, friendly_name: &str) -> CheckerMode {
        self.checkers.get(friendly_name).map(|c| c.mode).unwrap_or_default()
    }

    /// A free-form checker argument, if configured.
    pub fn checker_arg(&self, friendly_name: &str, key: &str) -> Option<&serde_json::Value> {
        self.checkers.get(friendly_name).and_then(|c| c.args.get(key))
    }

    /// The async creation wait budget for a request.
    pub fn max_async_wait_for(&self, request_id: &str) -> Duration {
        let secs = self
            .per_resource_max_async_wait_secs
            .get(request_id)
            .copied()
            .unwrap_or(self.max_async_resource_creation_time_secs);
        Duration::from_secs(secs)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn bug_buckets_dir(&self) -> PathBuf {
        self.output_dir.join("bug_buckets")
    }

    pub fn trace_db_path(&self) -> PathBuf {
        self.output_dir.join("trace.ndjson")
    }

    pub fn speccov_path(&self) -> PathBuf {
        self.output_dir.join("speccov.json")
    }
}
