//! Garbage collection of dynamic objects
//!
//! Every value a producer binds is tracked on a per-type ledger. When a
//! type's live count exceeds the configured cap, the oldest values are
//! deleted through the type's destructor request (the first DELETE in the
//! grammar that consumes the type). The pass runs after each generation and
//! on a timer between generations.

use tracing::{debug, warn};

use fuzzforge_trace::TraceTags;

use crate::error::Result;
use crate::executor::RequestExecutor;

/// Delete over-cap dynamic objects, oldest first.
///
/// A failed delete puts the value back on the ledger so a later pass can
/// retry it.
pub async fn run_garbage_collection(exec: &mut RequestExecutor) -> Result<usize> {
    let cap = exec.ctx().settings.garbage_collection.max_objects_per_type;
    let pool = exec.ctx().pool.clone();
    let collection = exec.ctx().collection.clone();

    let victims = {
        let mut state = exec.ctx().state.lock();
        state.dependencies.take_gc_victims(cap)
    };
    if victims.is_empty() {
        return Ok(0);
    }

    let mut deleted = 0;
    for (type_name, values) in victims {
        let Some(destructor) = collection.destructor_for(&type_name) else {
            debug!(type_name, "no destructor registered, dropping overflow values");
            continue;
        };
        for value in values {
            let rendered = destructor.render_at(&pool, 1)?;
            let resolved = {
                let state = exec.ctx().state.lock();
                state.dependencies.resolve_with_override(&rendered.payload, &type_name, &value)
            };
            let resolved = match resolved {
                Ok(data) => data,
                Err(miss) => {
                    debug!(variable = %miss.variable, "destructor depends on an unbound variable");
                    continue;
                }
            };

            let tags = TraceTags { origin: Some("gc".to_string()), ..Default::default() };
            let response = exec.send(&resolved, "gc", tags).await?;
            let gone = response.has_valid_code() || response.status_code() == Some("404");
            if gone {
                deleted += 1;
            } else {
                warn!(
                    type_name,
                    status = ?response.status_code(),
                    "garbage collection delete failed, requeueing"
                );
                let mut state = exec.ctx().state.lock();
                state.dependencies.requeue_gc_value(&type_name, &value);
            }
        }
    }
    Ok(deleted)
}
