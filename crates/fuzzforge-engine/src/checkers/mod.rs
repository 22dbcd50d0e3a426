//! Checker framework
//!
//! A checker receives each just-rendered sequence and mutates or extends it
//! to provoke a specific bug class, sending its probes through the worker's
//! own executor. Checkers must not permanently pollute the dependency
//! table: they either use the no-gc overlay or reset and rebuild state.
//!
//! Built-in checkers, in application order: leakage, resource hierarchy,
//! use-after-free, namespace, invalid dynamic object, payload body,
//! examples.

pub mod examples;
pub mod invalid_dynamic_object;
pub mod leakage;
pub mod namespace;
pub mod payload_body;
pub mod resource_hierarchy;
pub mod use_after_free;

use async_trait::async_trait;
use tracing::warn;

use fuzzforge_transport::HttpResponse;

use crate::error::Result;
use crate::executor::{Identity, PositionOutcome, RequestExecutor};
use crate::sequences::{RenderedSequence, Sequence};
use crate::state::FuzzingContext;

pub use examples::ExamplesChecker;
pub use invalid_dynamic_object::InvalidDynamicObjectChecker;
pub use leakage::LeakageChecker;
pub use namespace::NamespaceChecker;
pub use payload_body::PayloadBodyChecker;
pub use resource_hierarchy::ResourceHierarchyChecker;
pub use use_after_free::UseAfterFreeChecker;

/// A sequence mutator hunting one bug class
#[async_trait]
pub trait Checker: Send {
    /// Short name used as the bug bucket origin and settings key.
    fn friendly_name(&self) -> &'static str;

    /// Whether the checker runs when the settings file says nothing.
    fn default_enabled(&self) -> bool {
        true
    }

    /// Inspect one rendered sequence and probe for violations.
    async fn apply(
        &mut self,
        rendered: &RenderedSequence,
        exec: &mut RequestExecutor,
    ) -> Result<()>;
}

/// Instantiate the enabled checkers for one worker, in application order.
pub fn build_checkers(ctx: &FuzzingContext) -> Vec<Box<dyn Checker>> {
    let all: Vec<Box<dyn Checker>> = vec![
        Box::new(LeakageChecker::new(ctx)),
        Box::new(ResourceHierarchyChecker::new(ctx)),
        Box::new(UseAfterFreeChecker::new(ctx)),
        Box::new(NamespaceChecker::new(ctx)),
        Box::new(InvalidDynamicObjectChecker::new(ctx)),
        Box::new(PayloadBodyChecker::new(ctx)),
        Box::new(ExamplesChecker::new(ctx)),
    ];
    all.into_iter()
        .filter(|c| ctx.settings.checker_enabled(c.friendly_name(), c.default_enabled()))
        .collect()
}

/// Run every checker over a rendered sequence. Checker failures other than
/// budget exhaustion are logged and do not stop the run.
pub async fn apply_checkers(
    checkers: &mut [Box<dyn Checker>],
    rendered: &RenderedSequence,
    exec: &mut RequestExecutor,
) -> Result<()> {
    for checker in checkers.iter_mut() {
        match checker.apply(rendered, exec).await {
            Ok(()) => {}
            Err(e) if e.is_time_budget() => return Err(e),
            Err(e) => {
                warn!(checker = checker.friendly_name(), error = %e, "checker failed");
            }
        }
    }
    Ok(())
}

/// The general violation rule: a bug code is always a violation; a valid
/// code is one when the checker expected the server to reject the probe.
pub(crate) fn rule_violation(
    exec: &RequestExecutor,
    response: &HttpResponse,
    valid_response_is_violation: bool,
    false_alarm: bool,
) -> bool {
    if false_alarm {
        return false;
    }
    response.has_bug_code(&exec.ctx().bug_codes)
        || (valid_response_is_violation && response.has_valid_code())
}

/// Many services answer DELETE with 204 even when there is nothing to
/// delete; that is not a violation.
pub(crate) fn is_delete_204_false_alarm(seq: &Sequence, response: &HttpResponse) -> bool {
    response.status_code().is_some_and(|c| c.starts_with("204"))
        && seq.last_request().is_some_and(|r| r.method().starts_with("DELETE"))
}

/// Re-render and send every request of `original` except the last, using
/// the stored combination ids. Bugs surfacing during the replay are filed
/// under the checker's own origin.
pub(crate) async fn execute_start_of_sequence(
    exec: &mut RequestExecutor,
    original: &Sequence,
    origin: &str,
) -> Result<Sequence> {
    let reproduce = exec.ctx().settings.reproduce_bugs;
    let mut new_seq = Sequence::empty();
    for i in 0..original.length().saturating_sub(1) {
        let request = original.requests[i].clone();
        new_seq = new_seq.extended(request.clone());
        let cid = original.combination_id_at(i);
        let outcome = exec
            .send_request_at(&mut new_seq, &request, cid, origin, Identity::Primary, true)
            .await?;
        if let PositionOutcome::Sent { response, .. } = outcome {
            if response.has_bug_code(&exec.ctx().bug_codes) {
                let code = response.status_code().unwrap_or_default().to_string();
                exec.update_bug_buckets(&new_seq, &code, origin, reproduce, None, false).await?;
            }
        }
    }
    Ok(new_seq)
}
