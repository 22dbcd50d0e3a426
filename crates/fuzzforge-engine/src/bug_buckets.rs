//! Bug buckets
//!
//! Deduplicated store of bug-triggering sequences: one bucket class per
//! (origin, status code class), one entry per unique sequence within its
//! class, and a longer sequence is never reported when its final request
//! already ends an existing entry of the class.
//!
//! This module owns the pure bookkeeping; reproduction (which sends
//! requests) lives on the request executor.

use std::collections::BTreeMap;

use fuzzforge_grammar::str_to_hex_def;
use fuzzforge_transport::{CONNECTION_CLOSED_CODE, TIMEOUT_CODE};

use crate::sequences::Sequence;

/// One deduplicated finding
#[derive(Debug, Clone)]
pub struct BugBucketEntry {
    pub origin: String,
    pub bug_hash: String,
    pub status_code: String,
    /// Sequence identity key: the structural hex plus any checker variant
    pub sequence_hex: String,
    /// Final request identity key, same variant suffix as `sequence_hex`
    pub last_request_hex: String,
    pub reproducible: bool,
}

/// Store of findings keyed by bucket origin
#[derive(Debug, Default)]
pub struct BugBuckets {
    /// bucket origin -> entries in discovery order
    buckets: BTreeMap<String, Vec<BugBucketEntry>>,
}

/// The bucket class for an origin and status code.
pub fn bucket_origin(origin: &str, bug_code: &str) -> String {
    if bug_code == TIMEOUT_CODE {
        format!("{origin}_timeout")
    } else if bug_code == CONNECTION_CLOSED_CODE {
        format!("{origin}_connection_closed")
    } else if bug_code.starts_with("20") {
        format!("{origin}_20x")
    } else {
        format!("{origin}_{bug_code}")
    }
}

/// The unique bug hash for a sequence's final request.
pub fn bug_hash(
    bucket_origin: &str,
    sequence: &Sequence,
    hash_full_request: bool,
    checker_str: Option<&str>,
) -> String {
    let Some(last) = sequence.last_request() else {
        return format!("{bucket_origin}_{}", str_to_hex_def(""));
    };
    let mut request_str = if hash_full_request {
        last.hex_definition().to_string()
    } else {
        last.method_endpoint_hex_definition().to_string()
    };
    if let Some(extra) = checker_str {
        request_str.push_str(extra);
    }
    format!("{bucket_origin}_{}", str_to_hex_def(&request_str))
}

impl BugBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sequence was already filed under this bucket class.
    /// A finding is scoped to its class: the same sequence tripping a
    /// different status code class is a distinct finding.
    pub fn is_duplicate(&self, bucket_origin: &str, sequence_hex: &str) -> bool {
        self.buckets
            .get(bucket_origin)
            .is_some_and(|entries| entries.iter().any(|e| e.sequence_hex == sequence_hex))
    }

    /// Whether some entry of this bucket class already ends in the same
    /// request. If sequence xB exists, xyB adds nothing.
    pub fn ending_request_exists(&self, bucket_origin: &str, last_request_hex: &str) -> bool {
        self.buckets
            .get(bucket_origin)
            .is_some_and(|entries| entries.iter().any(|e| e.last_request_hex == last_request_hex))
    }

    /// File an entry. Callers perform the dedup checks first (the
    /// reproduction step between check and insert must happen unlocked).
    pub fn insert(&mut self, entry: BugBucketEntry) {
        self.buckets.entry(bucket_origin(&entry.origin, &entry.status_code)).or_default().push(entry);
    }

    /// Bucket count per class, sorted by class name.
    pub fn num_bug_buckets(&self) -> BTreeMap<String, usize> {
        self.buckets.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[BugBucketEntry])> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Total entries across all classes.
    pub fn total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}
