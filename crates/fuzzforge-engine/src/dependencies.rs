//! Dynamic variable table
//!
//! The process-wide mapping from producer variable names to their most
//! recent values. Two layers: the normal table, cleared between rendering
//! attempts, and a no-gc overlay that survives `reset_tlb` and is never
//! tracked for garbage collection (the leakage checker plants values there
//! so a later probe can still see them).

use std::collections::{HashMap, VecDeque};

use fuzzforge_grammar::RDELIM;

/// A dependency resolution miss: a reader had no bound value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyMiss {
    /// The unresolved variable name
    pub variable: String,
}

/// Producer variable bindings plus garbage collection bookkeeping
#[derive(Debug, Default)]
pub struct DependencyTable {
    tlb: HashMap<String, String>,
    no_gc: HashMap<String, String>,
    /// Per-type queue of created object values, oldest first
    gc_live: HashMap<String, VecDeque<String>>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable and mark the value live for garbage collection.
    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.tlb.insert(name.to_string(), value.to_string());
        self.gc_live.entry(name.to_string()).or_default().push_back(value.to_string());
    }

    /// Bind a variable without garbage collection tracking; survives resets.
    pub fn set_variable_no_gc(&mut self, name: &str, value: &str) {
        self.no_gc.insert(name.to_string(), value.to_string());
    }

    /// The current value of a variable, normal table first.
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.tlb.get(name).or_else(|| self.no_gc.get(name)).map(String::as_str)
    }

    /// Clear the normal table. The no-gc overlay and the GC ledger persist.
    pub fn reset_tlb(&mut self) {
        self.tlb.clear();
    }

    /// Substitute every `{RDELIM}name{RDELIM}` marker in `data`.
    ///
    /// A missing binding aborts resolution; the caller abandons the sequence
    /// at that position.
    pub fn resolve(&self, data: &str) -> std::result::Result<String, DependencyMiss> {
        if !data.contains(RDELIM) {
            return Ok(data.to_string());
        }
        let mut out = String::with_capacity(data.len());
        for (i, part) in data.split(RDELIM).enumerate() {
            if i % 2 == 0 {
                out.push_str(part);
            } else {
                match self.get_variable(part) {
                    Some(value) if !value.is_empty() => out.push_str(value),
                    _ => return Err(DependencyMiss { variable: part.to_string() }),
                }
            }
        }
        Ok(out)
    }

    /// Resolve with one variable pinned to a specific value; used by the
    /// garbage collector to aim a destructor at a particular victim.
    pub fn resolve_with_override(
        &self,
        data: &str,
        name: &str,
        value: &str,
    ) -> std::result::Result<String, DependencyMiss> {
        if !data.contains(RDELIM) {
            return Ok(data.to_string());
        }
        let mut out = String::with_capacity(data.len());
        for (i, part) in data.split(RDELIM).enumerate() {
            if i % 2 == 0 {
                out.push_str(part);
            } else if part == name {
                out.push_str(value);
            } else {
                match self.get_variable(part) {
                    Some(bound) if !bound.is_empty() => out.push_str(bound),
                    _ => return Err(DependencyMiss { variable: part.to_string() }),
                }
            }
        }
        Ok(out)
    }

    /// Put a value back on the live ledger after a failed delete.
    pub fn requeue_gc_value(&mut self, name: &str, value: &str) {
        self.gc_live.entry(name.to_string()).or_default().push_front(value.to_string());
    }

    /// Types whose live object count exceeds `cap`, with their overflow
    /// victims (oldest first). The victims are removed from the ledger.
    pub fn take_gc_victims(&mut self, cap: usize) -> Vec<(String, Vec<String>)> {
        let mut victims = Vec::new();
        for (type_name, live) in &mut self.gc_live {
            if live.len() > cap {
                let excess = live.len() - cap;
                let taken: Vec<String> = live.drain(..excess).collect();
                victims.push((type_name.clone(), taken));
            }
        }
        victims.sort_by(|a, b| a.0.cmp(&b.0));
        victims
    }

    /// Live object count for a type.
    pub fn live_count(&self, type_name: &str) -> usize {
        self.gc_live.get(type_name).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzforge_grammar::reader_marker;

    #[test]
    fn test_resolve_substitutes_markers() {
        let mut table = DependencyTable::new();
        table.set_variable("_post_a", "X");
        let data = format!("GET /a/{} HTTP/1.1\r\n\r\n", reader_marker("_post_a"));
        assert_eq!(table.resolve(&data).expect("resolve"), "GET /a/X HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_resolve_miss_reports_variable() {
        let table = DependencyTable::new();
        let data = format!("GET /a/{} HTTP/1.1\r\n\r\n", reader_marker("_post_a"));
        assert_eq!(
            table.resolve(&data),
            Err(DependencyMiss { variable: "_post_a".to_string() })
        );
    }

    #[test]
    fn test_reset_preserves_no_gc_overlay() {
        let mut table = DependencyTable::new();
        table.set_variable("_normal", "1");
        table.set_variable_no_gc("_planted", "2");
        table.reset_tlb();
        assert_eq!(table.get_variable("_normal"), None);
        assert_eq!(table.get_variable("_planted"), Some("2"));
    }

    #[test]
    fn test_normal_binding_shadows_overlay() {
        let mut table = DependencyTable::new();
        table.set_variable_no_gc("_v", "old");
        table.set_variable("_v", "new");
        assert_eq!(table.get_variable("_v"), Some("new"));
        table.reset_tlb();
        assert_eq!(table.get_variable("_v"), Some("old"));
    }

    #[test]
    fn test_gc_victims_oldest_first() {
        let mut table = DependencyTable::new();
        for i in 0..5 {
            table.set_variable("_obj", &format!("v{i}"));
        }
        let victims = table.take_gc_victims(3);
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].0, "_obj");
        assert_eq!(victims[0].1, vec!["v0", "v1"]);
        assert_eq!(table.live_count("_obj"), 3);
        assert!(table.take_gc_victims(3).is_empty());
    }
}
