//! Resource hierarchy checker
//!
//! Precondition: a valid sequence whose last request consumes a type no
//! predecessor consumes (the target child) alongside types the predecessors
//! do consume. The prefix is re-rendered up to just before the producer of
//! the target type, giving every dynamic object a fresh value except the
//! target, which keeps its value from the previous rendering. If the
//! terminal request still succeeds, the child was reachable under the wrong
//! parent.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::error::Result;
use crate::executor::{Identity, PositionOutcome, RequestExecutor};
use crate::sequences::{RenderedSequence, Sequence};
use crate::state::FuzzingContext;

use super::{rule_violation, Checker};

pub struct ResourceHierarchyChecker;

impl ResourceHierarchyChecker {
    pub fn new(_ctx: &FuzzingContext) -> Self {
        Self
    }
}

#[async_trait]
impl Checker for ResourceHierarchyChecker {
    fn friendly_name(&self) -> &'static str {
        "resourcehierarchy"
    }

    async fn apply(
        &mut self,
        rendered: &RenderedSequence,
        exec: &mut RequestExecutor,
    ) -> Result<()> {
        if !rendered.valid {
            return Ok(());
        }
        let seq = &rendered.sequence;
        // Destructor sequences belong to the use-after-free checker.
        if seq.has_destructor() || seq.length() < 2 {
            return Ok(());
        }

        let consumes = seq.consumes();
        let target_types: BTreeSet<String> =
            consumes.last().map(|s| (*s).clone()).unwrap_or_default();
        let predecessor_types: BTreeSet<String> = consumes[..consumes.len() - 1]
            .iter()
            .flat_map(|s| s.iter().cloned())
            .collect();

        // The last request must share ancestry with its predecessors and
        // still have a type of its own to swap.
        if predecessor_types.intersection(&target_types).next().is_none() {
            return Ok(());
        }
        let swap_types: BTreeSet<String> =
            target_types.difference(&predecessor_types).cloned().collect();
        if swap_types.is_empty() {
            return Ok(());
        }

        // Capture the previous rendering's values before wiping the table.
        let old_values: HashMap<String, String> = {
            let state = exec.ctx().state.lock();
            swap_types
                .iter()
                .filter_map(|t| {
                    state.dependencies.get_variable(t).map(|v| (t.clone(), v.to_string()))
                })
                .collect()
        };
        if old_values.is_empty() {
            return Ok(());
        }
        {
            let mut state = exec.ctx().state.lock();
            state.dependencies.reset_tlb();
        }

        // Re-render predecessors up to just before the first producer of a
        // swap type, so everything except the target gets fresh values.
        let mut n_predecessors = 0;
        for request in &seq.requests {
            if request.produces().intersection(&swap_types).next().is_some() {
                break;
            }
            n_predecessors += 1;
        }

        let reproduce = exec.ctx().settings.reproduce_bugs;
        let mut probe_seq = Sequence::empty();
        for i in 0..n_predecessors {
            let request = seq.requests[i].clone();
            probe_seq = probe_seq.extended(request.clone());
            let outcome = exec
                .send_request_at(
                    &mut probe_seq,
                    &request,
                    seq.combination_id_at(i),
                    self.friendly_name(),
                    Identity::Primary,
                    true,
                )
                .await?;
            if let PositionOutcome::Sent { response, .. } = outcome {
                if response.has_bug_code(&exec.ctx().bug_codes) {
                    let code = response.status_code().unwrap_or_default().to_string();
                    exec.update_bug_buckets(
                        &probe_seq,
                        &code,
                        self.friendly_name(),
                        reproduce,
                        None,
                        false,
                    )
                    .await?;
                }
            }
        }

        // Re-inject the stale target values atop the fresh rendering.
        {
            let mut state = exec.ctx().state.lock();
            for (type_name, value) in &old_values {
                state.dependencies.set_variable(type_name, value);
            }
        }

        let last = seq.requests[seq.length() - 1].clone();
        probe_seq = probe_seq.extended(last.clone());
        let outcome = exec
            .send_request_at(
                &mut probe_seq,
                &last,
                seq.combination_id_at(seq.length() - 1),
                self.friendly_name(),
                Identity::Primary,
                true,
            )
            .await?;
        if let PositionOutcome::Sent { response, .. } = outcome {
            if rule_violation(exec, &response, true, false) {
                let code = response.status_code().unwrap_or_default().to_string();
                exec.update_bug_buckets(
                    &probe_seq,
                    &code,
                    self.friendly_name(),
                    reproduce,
                    None,
                    false,
                )
                .await?;
            }
        }
        Ok(())
    }
}
