//! Namespace (multi-tenant) checker
//!
//! Requires two auth identities. The sequence first runs under the primary
//! identity to create victim objects; the checker then rebuilds the
//! attacker's view under the shadow identity, injects the victim's variable
//! values, and re-sends the consumer. A valid response means one tenant
//! reached another tenant's objects.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use fuzzforge_transport::HttpResponse;

use crate::error::Result;
use crate::executor::{Identity, PositionOutcome, RequestExecutor};
use crate::sequences::{RenderedSequence, Sequence};
use crate::settings::CheckerMode;
use crate::state::FuzzingContext;

use super::{rule_violation, Checker};

pub struct NamespaceChecker {
    mode: CheckerMode,
}

impl NamespaceChecker {
    pub fn new(ctx: &FuzzingContext) -> Self {
        Self { mode: ctx.settings.checker_mode("namespace") }
    }

    /// A GET returning an empty list reveals nothing across tenants.
    fn empty_list_false_alarm(seq: &Sequence, response: &HttpResponse) -> bool {
        seq.last_request().is_some_and(|r| r.method().starts_with("GET"))
            && response.body() == Some("[]")
    }
}

#[async_trait]
impl Checker for NamespaceChecker {
    fn friendly_name(&self) -> &'static str {
        "namespace"
    }

    // Needs a second identity, which most runs don't configure.
    fn default_enabled(&self) -> bool {
        false
    }

    async fn apply(
        &mut self,
        rendered: &RenderedSequence,
        exec: &mut RequestExecutor,
    ) -> Result<()> {
        if !rendered.valid {
            return Ok(());
        }
        // Two identities are required, either as refreshable tokens or as
        // shadow values in the dictionary.
        let has_shadow =
            exec.ctx().auth.has_shadow_identity() || exec.ctx().pool.has_shadow_values();
        if !has_shadow {
            return Ok(());
        }

        let seq = &rendered.sequence;
        let consumed_types: BTreeSet<String> =
            seq.consumes().iter().flat_map(|s| s.iter().cloned()).collect();
        if consumed_types.is_empty() {
            return Ok(());
        }
        if self.mode != CheckerMode::Exhaustive
            && seq.last_request().is_some_and(|r| r.consumes().is_empty())
        {
            return Ok(());
        }

        // Re-render the start of the original sequence as the victim so the
        // table holds fresh victim-owned objects.
        let mut victim_seq = Sequence::empty();
        for i in 0..seq.length().saturating_sub(1) {
            let request = seq.requests[i].clone();
            victim_seq = victim_seq.extended(request.clone());
            exec.send_request_at(
                &mut victim_seq,
                &request,
                seq.combination_id_at(i),
                self.friendly_name(),
                Identity::Primary,
                true,
            )
            .await?;
        }

        let hijacked_values: HashMap<String, String> = {
            let state = exec.ctx().state.lock();
            consumed_types
                .iter()
                .filter_map(|t| {
                    state.dependencies.get_variable(t).map(|v| (t.clone(), v.to_string()))
                })
                .collect()
        };
        if hijacked_values.is_empty() {
            return Ok(());
        }

        for (i, hijack_request) in seq.requests.iter().enumerate() {
            if self.mode != CheckerMode::Exhaustive && i != seq.length() - 1 {
                continue;
            }
            if hijack_request.consumes().is_empty() {
                continue;
            }

            {
                let mut state = exec.ctx().state.lock();
                state.dependencies.reset_tlb();
            }

            // Attacker subsequence: everything up to just before the first
            // producer of the hijacked types, re-run under the shadow
            // identity.
            let mut stopping_length = 0;
            for request in &seq.requests {
                if request
                    .produces()
                    .intersection(hijack_request.consumes())
                    .next()
                    .is_some()
                {
                    break;
                }
                stopping_length += 1;
            }
            let mut attacker_seq = Sequence::empty();
            for j in 0..stopping_length {
                let request = seq.requests[j].clone();
                attacker_seq = attacker_seq.extended(request.clone());
                exec.send_request_at(
                    &mut attacker_seq,
                    &request,
                    seq.combination_id_at(j),
                    self.friendly_name(),
                    Identity::Shadow,
                    true,
                )
                .await?;
            }

            // Feed the victim's values to the attacker.
            {
                let mut state = exec.ctx().state.lock();
                for (type_name, value) in &hijacked_values {
                    state.dependencies.set_variable(type_name, value);
                }
            }

            let mut probe_seq = attacker_seq.extended(hijack_request.clone());
            let outcome = exec
                .send_request_at(
                    &mut probe_seq,
                    hijack_request,
                    seq.combination_id_at(i),
                    self.friendly_name(),
                    Identity::Shadow,
                    false,
                )
                .await?;
            if let PositionOutcome::Sent { response, .. } = outcome {
                let false_alarm = Self::empty_list_false_alarm(&probe_seq, &response);
                if rule_violation(exec, &response, true, false_alarm) {
                    let code = response.status_code().unwrap_or_default().to_string();
                    // Cross-tenant findings are not replayed: reproduction
                    // would recreate the victim's state under one identity.
                    exec.update_bug_buckets(
                        &probe_seq,
                        &code,
                        self.friendly_name(),
                        false,
                        None,
                        false,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}
