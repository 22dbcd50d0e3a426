//! Invalid dynamic object checker
//!
//! Precondition: a valid sequence whose last request consumes dynamic
//! objects. Each consumed object is replaced with malformed variants
//! (trailing query injection, stray separators, doubled ids, an empty JSON
//! object) across every valid/invalid mask combination except all-valid. A
//! valid response to a malformed id is a bug.

use async_trait::async_trait;

use fuzzforge_grammar::RDELIM;
use fuzzforge_trace::TraceTags;

use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::sequences::{RenderedSequence, SentRequestData};
use crate::state::FuzzingContext;

use super::{execute_start_of_sequence, is_delete_204_false_alarm, rule_violation, Checker};

/// Replaced with the valid object value inside each invalid pattern.
const VALID_REPLACE_STR: &str = "valid-object";

pub struct InvalidDynamicObjectChecker {
    no_defaults: bool,
    user_invalids: Vec<String>,
}

impl InvalidDynamicObjectChecker {
    pub fn new(ctx: &FuzzingContext) -> Self {
        let no_defaults = ctx
            .settings
            .checker_arg("invaliddynamicobject", "no_defaults")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let user_invalids = ctx
            .settings
            .checker_arg("invaliddynamicobject", "invalid_objects")
            .and_then(serde_json::Value::as_array)
            .map(|values| {
                values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            })
            .unwrap_or_default();
        Self { no_defaults, user_invalids }
    }

    fn invalid_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::new();
        if !self.no_defaults {
            patterns.extend(
                [
                    format!("{VALID_REPLACE_STR}?injected_query_string=123"),
                    format!("{VALID_REPLACE_STR}/?/"),
                    format!("{VALID_REPLACE_STR}??"),
                    format!("{VALID_REPLACE_STR}/{VALID_REPLACE_STR}"),
                    "{}".to_string(),
                ]
                .into_iter(),
            );
        }
        patterns.extend(self.user_invalids.iter().cloned());
        patterns
    }

    /// All payload variants with at least one object made invalid.
    fn prepare_invalid_requests(&self, exec: &RequestExecutor, data: &str) -> Vec<String> {
        let parts: Vec<String> = data.split(RDELIM).map(str::to_string).collect();
        if parts.len() < 3 {
            return Vec::new();
        }

        // Odd indices hold the consumed variable names; save their values.
        let values: Vec<String> = {
            let state = exec.ctx().state.lock();
            parts
                .iter()
                .skip(1)
                .step_by(2)
                .map(|name| {
                    state.dependencies.get_variable(name).unwrap_or_default().to_string()
                })
                .collect()
        };

        let n = values.len();
        let mut variants = Vec::new();
        for pattern in self.invalid_patterns() {
            // Every valid/invalid combination except all-valid.
            for valid_mask in 0..(2u64.pow(n as u32) - 1) {
                let mut rendered = parts.clone();
                for (index, part_idx) in (1..rendered.len()).step_by(2).enumerate() {
                    rendered[part_idx] = if (valid_mask >> index) & 1 == 1 {
                        values[index].clone()
                    } else {
                        pattern.replace(VALID_REPLACE_STR, &values[index])
                    };
                }
                variants.push(rendered.concat());
            }
        }
        variants
    }
}

#[async_trait]
impl Checker for InvalidDynamicObjectChecker {
    fn friendly_name(&self) -> &'static str {
        "invaliddynamicobject"
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
        let Some(last) = seq.last_request().cloned() else {
            return Ok(());
        };
        if last.consumes().is_empty() {
            return Ok(());
        }

        // One probe per (request, generation).
        let generation = seq.length() as u64;
        {
            let mut state = exec.ctx().state.lock();
            if !state.checker_state.mark_generation_executed(
                self.friendly_name(),
                generation,
                last.hex_definition(),
            ) {
                return Ok(());
            }
        }

        // The valid rendering of the last request, markers still in place.
        let last_cid = seq.combination_id_at(seq.length() - 1);
        let last_rendering = last.render_at(&exec.ctx().pool, last_cid)?.payload;

        let mut probe_seq =
            execute_start_of_sequence(exec, seq, self.friendly_name()).await?;
        probe_seq = probe_seq.extended(last.clone());

        let reproduce = exec.ctx().settings.reproduce_bugs;
        for data in self.prepare_invalid_requests(exec, &last_rendering) {
            let tags = TraceTags {
                request_id: Some(last.request_id().to_string()),
                origin: Some(self.friendly_name().to_string()),
                ..Default::default()
            };
            let response = exec.send(&data, self.friendly_name(), tags).await?;
            let _ = exec.apply_parser(&last, &response);

            let false_alarm = is_delete_204_false_alarm(&probe_seq, &response);
            if rule_violation(exec, &response, true, false_alarm) {
                let mut bug_seq = probe_seq.clone();
                bug_seq.append_sent_data(SentRequestData {
                    rendered_data: data.clone(),
                    combination_id: last_cid,
                    response: response.clone(),
                    max_async_wait: std::time::Duration::ZERO,
                });
                let code = response.status_code().unwrap_or_default().to_string();
                exec.update_bug_buckets(
                    &bug_seq,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_patterns_respect_no_defaults() {
        let checker = InvalidDynamicObjectChecker {
            no_defaults: true,
            user_invalids: vec!["<script>".to_string()],
        };
        assert_eq!(checker.invalid_patterns(), vec!["<script>"]);

        let with_defaults = InvalidDynamicObjectChecker {
            no_defaults: false,
            user_invalids: Vec::new(),
        };
        assert_eq!(with_defaults.invalid_patterns().len(), 5);
    }
}
