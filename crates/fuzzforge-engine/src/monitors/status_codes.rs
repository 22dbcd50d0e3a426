//! Status codes monitor
//!
//! Per-sequence history of the status codes received by each request, plus
//! the per-origin request counters. The driver and checkers query it to
//! learn whether a request ever reached full validity.

use std::collections::HashMap;
use std::time::Duration;

/// One request execution outcome
#[derive(Debug, Clone)]
pub struct RequestExecutionStatus {
    /// Time since the start of the run
    pub relative_timestamp: Duration,
    pub request_hex: String,
    pub status_code: String,
    /// Valid status code and the response parser extracted its variables
    pub is_fully_valid: bool,
    /// The sequence failed before this request completed
    pub sequence_failure: bool,
    pub num_test_cases: usize,
}

/// Status code history of one sequence
#[derive(Debug, Default)]
pub struct SequenceStatusCodes {
    pub length: usize,
    /// status code -> executions that received it
    pub request_statuses: HashMap<String, Vec<RequestExecutionStatus>>,
}

/// Result of a status code query for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCodeQuery {
    pub valid_code: bool,
    pub fully_valid: bool,
    pub sequence_failure: bool,
}

/// Collects status codes across all executed sequences
#[derive(Debug, Default)]
pub struct StatusCodesMonitor {
    /// Counter of requests sent per origin (main_driver, gc, checker names)
    requests_count: HashMap<String, usize>,
    /// sequence hex -> status history, in insertion order
    sequence_order: Vec<String>,
    sequence_statuses: HashMap<String, SequenceStatusCodes>,
}

impl StatusCodesMonitor {
    pub fn new() -> Self {
        let mut requests_count = HashMap::new();
        requests_count.insert("gc".to_string(), 0);
        requests_count.insert("main_driver".to_string(), 0);
        Self { requests_count, sequence_order: Vec::new(), sequence_statuses: HashMap::new() }
    }

    pub fn increment_requests_count(&mut self, origin: &str) {
        *self.requests_count.entry(origin.to_string()).or_insert(0) += 1;
    }

    pub fn num_requests_sent(&self) -> HashMap<String, usize> {
        self.requests_count.clone()
    }

    /// Total test cases so far: per sequence, executions divided by length.
    pub fn num_test_cases(&self) -> usize {
        let mut total = 0.0;
        for statuses in self.sequence_statuses.values() {
            if statuses.length == 0 {
                continue;
            }
            let executions: usize =
                statuses.request_statuses.values().map(Vec::len).sum();
            total += executions as f64 / statuses.length as f64;
        }
        total as usize
    }

    /// Record the statuses of one executed sequence attempt.
    pub fn update(
        &mut self,
        sequence_hex: &str,
        sequence_length: usize,
        statuses: Vec<RequestExecutionStatus>,
    ) {
        *self.requests_count.entry("main_driver".to_string()).or_insert(0) += sequence_length;
        if !self.sequence_statuses.contains_key(sequence_hex) {
            self.sequence_order.push(sequence_hex.to_string());
            self.sequence_statuses.insert(
                sequence_hex.to_string(),
                SequenceStatusCodes { length: sequence_length, ..Default::default() },
            );
        }
        let num_test_cases = self.num_test_cases() + 1;
        let entry = self
            .sequence_statuses
            .get_mut(sequence_hex)
            .expect("entry was just inserted");
        for mut status in statuses {
            status.num_test_cases = num_test_cases;
            entry
                .request_statuses
                .entry(status.status_code.clone())
                .or_default()
                .push(status);
        }
    }

    /// Find the first recorded execution of `request_hex` whose status code
    /// is in `valid_codes` or `fail_codes`, scanning sequences in insertion
    /// order.
    pub fn query_response_codes(
        &self,
        request_hex: &str,
        valid_codes: &[&str],
        fail_codes: &[&str],
    ) -> StatusCodeQuery {
        for seq_hex in &self.sequence_order {
            let Some(statuses) = self.sequence_statuses.get(seq_hex) else {
                continue;
            };
            for (code, executions) in &statuses.request_statuses {
                let code = code.as_str();
                if !valid_codes.contains(&code) && !fail_codes.contains(&code) {
                    continue;
                }
                for execution in executions {
                    if execution.request_hex == request_hex {
                        return StatusCodeQuery {
                            valid_code: valid_codes.contains(&code),
                            fully_valid: execution.is_fully_valid,
                            sequence_failure: execution.sequence_failure,
                        };
                    }
                }
            }
        }
        StatusCodeQuery::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(request_hex: &str, code: &str, fully_valid: bool) -> RequestExecutionStatus {
        RequestExecutionStatus {
            relative_timestamp: Duration::ZERO,
            request_hex: request_hex.to_string(),
            status_code: code.to_string(),
            is_fully_valid: fully_valid,
            sequence_failure: false,
            num_test_cases: 0,
        }
    }

    #[test]
    fn test_update_counts_main_driver_requests() {
        let mut monitor = StatusCodesMonitor::new();
        monitor.update("seq", 2, vec![status("a", "200", true), status("b", "200", true)]);
        assert_eq!(monitor.num_requests_sent()["main_driver"], 2);
    }

    #[test]
    fn test_query_finds_fully_valid_execution() {
        let mut monitor = StatusCodesMonitor::new();
        monitor.update("seq", 1, vec![status("a", "200", true)]);
        let result = monitor.query_response_codes("a", &["200"], &["500"]);
        assert!(result.valid_code);
        assert!(result.fully_valid);
        assert!(!result.sequence_failure);
    }

    #[test]
    fn test_query_reports_fail_codes() {
        let mut monitor = StatusCodesMonitor::new();
        monitor.update("seq", 1, vec![status("a", "500", false)]);
        let result = monitor.query_response_codes("a", &["200"], &["500"]);
        assert!(!result.valid_code);
        assert!(!result.fully_valid);
    }

    #[test]
    fn test_query_misses_default_to_false() {
        let monitor = StatusCodesMonitor::new();
        let result = monitor.query_response_codes("a", &["200"], &[]);
        assert_eq!(result, StatusCodeQuery::default());
    }

    #[test]
    fn test_num_test_cases_normalizes_by_length() {
        let mut monitor = StatusCodesMonitor::new();
        monitor.update("seq", 2, vec![status("a", "200", true), status("b", "200", true)]);
        monitor.update("seq", 2, vec![status("a", "200", true), status("b", "404", false)]);
        assert_eq!(monitor.num_test_cases(), 2);
    }
}
