//! Use-after-free checker
//!
//! Precondition: a valid sequence ending in a destructor. The deleted
//! object's values are still bound in the dependency table, so any consumer
//! of the same type hierarchy can be aimed at the freed object. A valid
//! response is a bug.

use async_trait::async_trait;

use crate::error::Result;
use crate::executor::{Identity, PositionOutcome, RequestExecutor};
use crate::sequences::RenderedSequence;
use crate::settings::CheckerMode;
use crate::state::FuzzingContext;

use super::{rule_violation, Checker};

pub struct UseAfterFreeChecker {
    mode: CheckerMode,
}

impl UseAfterFreeChecker {
    pub fn new(ctx: &FuzzingContext) -> Self {
        Self { mode: ctx.settings.checker_mode("useafterfree") }
    }
}

#[async_trait]
impl Checker for UseAfterFreeChecker {
    fn friendly_name(&self) -> &'static str {
        "useafterfree"
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
        let Some(destructor) = seq.last_request().cloned() else {
            return Ok(());
        };
        if !destructor.is_destructor() {
            return Ok(());
        }
        // The destructor's consumed set defines a whole hierarchy, not just
        // one type; only consumers of the exact hierarchy keep the false
        // positive rate down.
        let destructed_types = destructor.consumes().clone();
        if destructed_types.is_empty() {
            return Ok(());
        }

        let consumers: Vec<_> = exec
            .ctx()
            .collection
            .fuzzing_requests()
            .into_iter()
            .filter(|r| {
                r.hex_definition() != destructor.hex_definition()
                    && r.consumes() == &destructed_types
            })
            .collect();

        let cap = exec.ctx().settings.max_combinations;
        let pool = exec.ctx().pool.clone();
        let reproduce = exec.ctx().settings.reproduce_bugs;

        for consumer in consumers {
            let mut probe_seq = seq.clone().extended(consumer.clone());
            let total = consumer.combination_count(&pool, Some(cap))?;

            for cid in 1..=total {
                let skip = {
                    let state = exec.ctx().state.lock();
                    state
                        .monitor
                        .renderings
                        .is_invalid_rendering(consumer.hex_definition(), cid)
                };
                if skip {
                    continue;
                }

                let outcome = exec
                    .send_request_at(
                        &mut probe_seq,
                        &consumer,
                        cid,
                        self.friendly_name(),
                        Identity::Primary,
                        false,
                    )
                    .await?;
                match outcome {
                    PositionOutcome::Sent { response, .. } => {
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
                    PositionOutcome::ResolveMiss { .. } | PositionOutcome::NoToken => break,
                }
            }

            if self.mode != CheckerMode::Exhaustive {
                break;
            }
        }
        Ok(())
    }
}
