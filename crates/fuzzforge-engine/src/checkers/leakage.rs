//! Leakage checker
//!
//! Precondition: an *invalid* final rendering. After a failed creation the
//! server should have nothing to show; this checker plants the values the
//! failed request was trying to produce (on the no-gc overlay, so they
//! survive table resets) and probes a matching consumer. A valid response
//! means the server leaked the would-be resource.

use async_trait::async_trait;

use fuzzforge_grammar::{Request, RDELIM};

use crate::error::Result;
use crate::executor::{Identity, PositionOutcome, RequestExecutor};
use crate::sequences::RenderedSequence;
use crate::settings::CheckerMode;
use crate::state::FuzzingContext;

use super::{is_delete_204_false_alarm, rule_violation, Checker};

pub struct LeakageChecker {
    mode: CheckerMode,
}

impl LeakageChecker {
    pub fn new(ctx: &FuzzingContext) -> Self {
        Self { mode: ctx.settings.checker_mode("leakage") }
    }

    /// Bind the path-segment values of the failed request so a consumer's
    /// readers resolve to exactly what the server might have leaked.
    fn plant_dynamic_variables(exec: &RequestExecutor, sent_data: &str, consumer: &Request) {
        let request_line = sent_data.split(" HTTP").next().unwrap_or("");
        let sent_path = request_line.splitn(2, ' ').nth(1).unwrap_or(request_line);
        let sent_path = sent_path.split('?').next().unwrap_or(sent_path);
        let sent_segments: Vec<&str> = sent_path.split('/').collect();

        let template = consumer.path_template();
        let mut state = exec.ctx().state.lock();
        for (i, segment) in template.split('/').enumerate() {
            if segment.contains(RDELIM) {
                let name = segment.replace(RDELIM, "");
                if let Some(value) = sent_segments.get(i) {
                    state.dependencies.set_variable_no_gc(&name, value);
                }
            }
        }
    }
}

#[async_trait]
impl Checker for LeakageChecker {
    fn friendly_name(&self) -> &'static str {
        "leakage"
    }

    async fn apply(
        &mut self,
        rendered: &RenderedSequence,
        exec: &mut RequestExecutor,
    ) -> Result<()> {
        // Unlike the other checkers, the precondition is a failed rendering.
        if rendered.valid || rendered.sequence.is_empty() {
            return Ok(());
        }
        let seq = &rendered.sequence;
        // Destructor sequences belong to the use-after-free checker.
        if seq.has_destructor() {
            return Ok(());
        }
        let Some(last) = seq.last_request().cloned() else {
            return Ok(());
        };
        let Some(last_sent) = seq.sent_request_data_list.last().cloned() else {
            return Ok(());
        };

        let seq_produced = seq.all_produced();
        let target_types = last.produces().clone();
        let reproduce = exec.ctx().settings.reproduce_bugs;

        for target_type in &target_types {
            let candidates = exec.ctx().collection.requests_for_id(last.request_id());
            for consumer in candidates {
                if consumer.consumes().is_empty()
                    || !consumer.consumes().is_subset(&seq_produced)
                    || !consumer.consumes().contains(target_type)
                {
                    continue;
                }

                Self::plant_dynamic_variables(exec, &last_sent.rendered_data, &consumer);

                let mut probe_seq = seq.clone().extended(consumer.clone());
                let outcome = exec
                    .send_request_at(
                        &mut probe_seq,
                        &consumer,
                        1,
                        self.friendly_name(),
                        Identity::Primary,
                        true,
                    )
                    .await?;
                if let PositionOutcome::Sent { response, .. } = outcome {
                    let false_alarm = is_delete_204_false_alarm(&probe_seq, &response);
                    if rule_violation(exec, &response, true, false_alarm) {
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

                if self.mode != CheckerMode::Exhaustive {
                    break;
                }
            }
        }
        Ok(())
    }
}
