//! Spec coverage accounting
//!
//! Per-request aggregate of validity and failure causes over a run, written
//! as JSON at the end. A request is keyed by `METHOD endpoint`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a rendering of a request concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageOutcome {
    Valid,
    /// Dependency resolution miss
    SequenceFailure,
    /// A prefix request failed to recreate its resource
    ResourceFailure,
    /// Response parser extracted nothing
    ParserFailure,
    /// The response carried a bug code
    Bug500,
}

/// Counters for one request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecCovEntry {
    pub valid: u32,
    pub invalid_due_to_sequence_failure: u32,
    pub invalid_due_to_resource_failure: u32,
    pub invalid_due_to_parser_failure: u32,
    pub invalid_due_to_500: u32,
}

/// Run-wide coverage tracker
#[derive(Debug, Default)]
pub struct SpecCovTracker {
    per_request: BTreeMap<String, SpecCovEntry>,
}

impl SpecCovTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a request has an entry even before any classified outcome.
    pub fn touch(&mut self, method: &str, endpoint: &str) {
        self.per_request.entry(format!("{method} {endpoint}")).or_default();
    }

    /// Record one classified rendering outcome.
    pub fn record(&mut self, method: &str, endpoint: &str, outcome: CoverageOutcome) {
        let entry = self.per_request.entry(format!("{method} {endpoint}")).or_default();
        match outcome {
            CoverageOutcome::Valid => entry.valid += 1,
            CoverageOutcome::SequenceFailure => entry.invalid_due_to_sequence_failure += 1,
            CoverageOutcome::ResourceFailure => entry.invalid_due_to_resource_failure += 1,
            CoverageOutcome::ParserFailure => entry.invalid_due_to_parser_failure += 1,
            CoverageOutcome::Bug500 => entry.invalid_due_to_500 += 1,
        }
    }

    pub fn entry(&self, method: &str, endpoint: &str) -> Option<&SpecCovEntry> {
        self.per_request.get(&format!("{method} {endpoint}"))
    }

    /// Write the aggregate as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(&self.per_request)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_request() {
        let mut tracker = SpecCovTracker::new();
        tracker.record("PUT", "/a/a", CoverageOutcome::Valid);
        tracker.record("PUT", "/a/a", CoverageOutcome::Bug500);
        tracker.record("GET", "/a/{name}", CoverageOutcome::SequenceFailure);

        let put = tracker.entry("PUT", "/a/a").expect("entry");
        assert_eq!(put.valid, 1);
        assert_eq!(put.invalid_due_to_500, 1);
        let get = tracker.entry("GET", "/a/{name}").expect("entry");
        assert_eq!(get.invalid_due_to_sequence_failure, 1);
    }

    #[test]
    fn test_written_json_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("speccov.json");
        let mut tracker = SpecCovTracker::new();
        tracker.touch("GET", "/never-reached");
        tracker.record("PUT", "/a", CoverageOutcome::ParserFailure);
        tracker.write_to(&path).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["PUT /a"]["invalid_due_to_parser_failure"], 1);
        assert_eq!(value["GET /never-reached"]["valid"], 0);
    }
}
