//! Fuzzing monitors
//!
//! The fuzzing monitor is the façade over the renderings and status-code
//! monitors and owns the global clock, the wall-clock time budget, and the
//! generation counter. The engine holds exactly one behind the shared lock;
//! tests construct fresh instances.

pub mod renderings;
pub mod status_codes;

use std::time::{Duration, Instant};

pub use renderings::RenderingsMonitor;
pub use status_codes::{
    RequestExecutionStatus, SequenceStatusCodes, StatusCodeQuery, StatusCodesMonitor,
};

/// Global monitor for a fuzzing run
#[derive(Debug)]
pub struct FuzzingMonitor {
    start_time: Instant,
    time_budget: Duration,
    pub renderings: RenderingsMonitor,
    pub status_codes: StatusCodesMonitor,
}

impl Default for FuzzingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzingMonitor {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            // ~ one month, same spirit as "effectively unbounded"
            time_budget: Duration::from_secs(24 * 30 * 3600),
            renderings: RenderingsMonitor::new(),
            status_codes: StatusCodesMonitor::new(),
        }
    }

    pub fn set_time_budget(&mut self, budget: Duration) {
        self.time_budget = budget;
    }

    /// Reset the clock to now (after preprocessing).
    pub fn reset_start_time(&mut self) {
        self.start_time = Instant::now();
    }

    pub fn running_time(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Checked at every send and every async poll.
    pub fn time_budget_exhausted(&self) -> bool {
        self.running_time() >= self.time_budget
    }

    /// Cooperative termination: zero the budget so every worker stops at its
    /// next send.
    pub fn terminate_fuzzing(&mut self) {
        self.time_budget = Duration::ZERO;
    }

    pub fn current_generation(&self) -> u64 {
        self.renderings.current_generation()
    }

    pub fn set_current_generation(&mut self, generation: u64) {
        self.renderings.set_current_generation(generation);
    }

    pub fn increment_requests_count(&mut self, origin: &str) {
        self.status_codes.increment_requests_count(origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_exhausts_budget() {
        let mut monitor = FuzzingMonitor::new();
        assert!(!monitor.time_budget_exhausted());
        monitor.terminate_fuzzing();
        assert!(monitor.time_budget_exhausted());
    }

    #[test]
    fn test_generation_counter_round_trips() {
        let mut monitor = FuzzingMonitor::new();
        assert_eq!(monitor.current_generation(), 0);
        monitor.set_current_generation(3);
        assert_eq!(monitor.current_generation(), 3);
    }
}
