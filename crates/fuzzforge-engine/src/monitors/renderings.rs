//! Renderings monitor
//!
//! Per-generation record of which rendering combinations of each request
//! came back valid or invalid. The driver consults it to skip combinations
//! that completed the previous generation with only invalid outcomes.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct RenderingRecord {
    valid: HashSet<u64>,
    invalid: HashSet<u64>,
}

/// Tracks rendering validity per generation and request
#[derive(Debug, Default)]
pub struct RenderingsMonitor {
    current_generation: u64,
    /// generation -> request hex -> valid/invalid combination ids
    rendering_ids: HashMap<u64, HashMap<String, RenderingRecord>>,
    memoize_invalid: bool,
}

impl RenderingsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one rendering combination.
    pub fn update(&mut self, request_hex: &str, combination_id: u64, is_valid: bool) {
        let record = self
            .rendering_ids
            .entry(self.current_generation)
            .or_default()
            .entry(request_hex.to_string())
            .or_default();
        if is_valid {
            record.valid.insert(combination_id);
        } else {
            record.invalid.insert(combination_id);
        }
    }

    /// Clear all state (after preprocessing, before the fuzzing run).
    pub fn reset(&mut self) {
        self.rendering_ids.clear();
    }

    /// Whether a combination is known invalid from the previous generation.
    ///
    /// The same combination can appear in both sets (different prefixes), so
    /// a skip requires membership in `invalid` and absence from `valid`.
    pub fn is_invalid_rendering(&self, request_hex: &str, combination_id: u64) -> bool {
        if !self.memoize_invalid {
            return false;
        }
        let Some(previous) = self
            .current_generation
            .checked_sub(1)
            .and_then(|g| self.rendering_ids.get(&g))
        else {
            return false;
        };
        let Some(record) = previous.get(request_hex) else {
            return false;
        };
        record.invalid.contains(&combination_id) && !record.valid.contains(&combination_id)
    }

    /// Whether the request was ever rendered in any past generation, which
    /// means its dependencies were satisfiable within some sequence.
    pub fn is_fully_rendered_request(&self, request_hex: &str) -> bool {
        if self.current_generation == 0 {
            return false;
        }
        (0..self.current_generation)
            .any(|g| self.rendering_ids.get(&g).is_some_and(|r| r.contains_key(request_hex)))
    }

    /// How many of `request_hexes` have been rendered at least once.
    pub fn num_fully_rendered_requests<'a>(
        &self,
        request_hexes: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        request_hexes
            .into_iter()
            .filter(|hex| self.is_fully_rendered_request(hex))
            .count()
    }

    pub fn set_memoize_invalid_past_renderings(&mut self, on: bool) {
        self.memoize_invalid = on;
    }

    pub fn current_generation(&self) -> u64 {
        self.current_generation
    }

    pub fn set_current_generation(&mut self, generation: u64) {
        self.current_generation = generation;
    }
}
