//! Sequence generator
//!
//! Breadth-first expansion by generation: every sequence that reached a
//! fully-valid final request at length `g` is extended by each request whose
//! consumed variables the sequence produces, and the new candidates are
//! rendered, sent, classified, and handed to the checkers. Workers split
//! the candidate list; generation advancement is a barrier.
//!
//! Candidate ordering is deterministic: requests in grammar order, then
//! seed sequences in insertion order, then combination ids ascending.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use fuzzforge_transport::NEVER_SENT_CODE;

use crate::checkers::{apply_checkers, build_checkers};
use crate::error::{EngineError, Result};
use crate::executor::{Identity, PositionOutcome, RequestExecutor};
use crate::gc::run_garbage_collection;
use crate::monitors::RequestExecutionStatus;
use crate::sequences::{RenderFailureKind, RenderedSequence, Sequence};
use crate::speccov::CoverageOutcome;
use crate::state::FuzzingContext;

/// Final accounting of a fuzzing run
#[derive(Debug)]
pub struct FuzzingSummary {
    /// Candidate sequences rendered across all generations
    pub total_sequences: usize,
    /// Last generation that was expanded
    pub generations: u64,
    /// Bucket counts per class
    pub bug_buckets: std::collections::BTreeMap<String, usize>,
    /// Requests sent per origin
    pub requests_sent: std::collections::HashMap<String, usize>,
    /// True when the run ended on the time budget rather than exhaustion
    pub stopped_on_time_budget: bool,
}

/// Execute the create-once prerequisites and stash their payloads for
/// replay logs.
async fn run_preprocessing(ctx: &FuzzingContext, exec: &mut RequestExecutor) -> Result<()> {
    let create_once = ctx.collection.create_once_requests();
    if create_once.is_empty() {
        return Ok(());
    }
    info!(count = create_once.len(), "executing create-once requests");
    let mut seq = Sequence::empty();
    for request in create_once {
        seq = seq.extended(request.clone());
        let outcome = exec
            .send_request_at(&mut seq, &request, 1, "preprocessing", Identity::Primary, true)
            .await?;
        if let PositionOutcome::Sent { fully_valid: false, response, .. } = outcome {
            warn!(
                endpoint = request.endpoint(),
                status = ?response.status_code(),
                "create-once request was not fully valid"
            );
        }
    }
    let mut state = ctx.state.lock();
    state.create_once_data = seq.sent_request_data_list.clone();
    Ok(())
}

fn record_status(
    ctx: &FuzzingContext,
    statuses: &mut Vec<RequestExecutionStatus>,
    request_hex: &str,
    status_code: &str,
    is_fully_valid: bool,
    sequence_failure: bool,
) {
    let relative_timestamp = ctx.state.lock().monitor.running_time();
    statuses.push(RequestExecutionStatus {
        relative_timestamp,
        request_hex: request_hex.to_string(),
        status_code: status_code.to_string(),
        is_fully_valid,
        sequence_failure,
        num_test_cases: 0,
    });
}

/// Render one candidate sequence: iterate the final request's combinations
/// until one is fully valid or the space is exhausted.
pub async fn render_sequence(
    exec: &mut RequestExecutor,
    mut candidate: Sequence,
) -> Result<RenderedSequence> {
    let ctx = exec.ctx().clone();
    let last = candidate.last_request().cloned().expect("candidates are never empty");
    let prefix_len = candidate.length() - 1;
    let prefix_cids: Vec<u64> = (0..prefix_len).map(|i| candidate.combination_id_at(i)).collect();

    let cap = ctx.settings.max_combinations;
    let total = last.combination_count(&ctx.pool, Some(cap))?;

    {
        let mut state = ctx.state.lock();
        state.speccov.touch(last.method(), last.endpoint());
    }

    let mut last_failure = RenderFailureKind::InvalidResponse;
    let mut last_response = None;

    for cid in 1..=total {
        let skip = {
            let state = ctx.state.lock();
            state.monitor.renderings.is_invalid_rendering(last.hex_definition(), cid)
        };
        if skip {
            debug!(request = last.endpoint(), cid, "skipping known-invalid rendering");
            continue;
        }

        {
            let mut state = ctx.state.lock();
            state.dependencies.reset_tlb();
        }
        candidate.clear_sent_data();

        let mut statuses = Vec::new();
        let mut failure: Option<RenderFailureKind> = None;
        let mut final_response = None;
        let mut abandon_candidate = false;

        // Replay the prefix at its stored combinations.
        for i in 0..prefix_len {
            let request = candidate.requests[i].clone();
            let outcome = exec
                .send_request_at(
                    &mut candidate,
                    &request,
                    prefix_cids[i],
                    "main_driver",
                    Identity::Primary,
                    true,
                )
                .await?;
            match outcome {
                PositionOutcome::Sent { response, fully_valid, .. } => {
                    let code = response.status_code().unwrap_or_default().to_string();
                    record_status(&ctx, &mut statuses, request.hex_definition(), &code, fully_valid, false);
                    if !fully_valid {
                        failure = Some(RenderFailureKind::ResourceCreation);
                        break;
                    }
                }
                PositionOutcome::ResolveMiss { .. } => {
                    record_status(&ctx, &mut statuses, request.hex_definition(), NEVER_SENT_CODE, false, true);
                    failure = Some(RenderFailureKind::DependencyResolution);
                    break;
                }
                PositionOutcome::NoToken => {
                    failure = Some(RenderFailureKind::ResourceCreation);
                    abandon_candidate = true;
                    break;
                }
            }
        }

        // Render and send the final request.
        if failure.is_none() {
            let outcome = exec
                .send_request_at(&mut candidate, &last, cid, "main_driver", Identity::Primary, true)
                .await?;
            match outcome {
                PositionOutcome::Sent { response, fully_valid, parser_failed } => {
                    let code = response.status_code().unwrap_or_default().to_string();
                    record_status(&ctx, &mut statuses, last.hex_definition(), &code, fully_valid, false);
                    final_response = Some(response.clone());
                    if !fully_valid {
                        failure = Some(if response.has_bug_code(&ctx.bug_codes) {
                            RenderFailureKind::BugCode
                        } else if parser_failed {
                            RenderFailureKind::ResponseParsing
                        } else {
                            RenderFailureKind::InvalidResponse
                        });
                    }
                }
                PositionOutcome::ResolveMiss { .. } => {
                    record_status(&ctx, &mut statuses, last.hex_definition(), NEVER_SENT_CODE, false, true);
                    failure = Some(RenderFailureKind::DependencyResolution);
                }
                PositionOutcome::NoToken => {
                    failure = Some(RenderFailureKind::InvalidResponse);
                    abandon_candidate = true;
                }
            }
        } else {
            // The final request was never reached.
            record_status(&ctx, &mut statuses, last.hex_definition(), NEVER_SENT_CODE, false, true);
        }

        let coverage = match failure {
            None => Some(CoverageOutcome::Valid),
            Some(RenderFailureKind::DependencyResolution) => Some(CoverageOutcome::SequenceFailure),
            Some(RenderFailureKind::ResourceCreation) => Some(CoverageOutcome::ResourceFailure),
            Some(RenderFailureKind::ResponseParsing) => Some(CoverageOutcome::ParserFailure),
            Some(RenderFailureKind::BugCode) => Some(CoverageOutcome::Bug500),
            Some(RenderFailureKind::InvalidResponse) => None,
        };
        {
            let mut state = ctx.state.lock();
            state.monitor.renderings.update(last.hex_definition(), cid, failure.is_none());
            let seq_hex = candidate.hex_definition();
            let seq_len = candidate.length();
            state.monitor.status_codes.update(&seq_hex, seq_len, statuses);
            if let Some(outcome) = coverage {
                state.speccov.record(last.method(), last.endpoint(), outcome);
            }
        }

        match failure {
            None => {
                let response = final_response.expect("valid rendering has a response");
                return Ok(RenderedSequence::valid(candidate, response));
            }
            Some(RenderFailureKind::BugCode) => {
                let response = final_response.clone().expect("bug rendering has a response");
                let code = response.status_code().unwrap_or_default().to_string();
                let reproduce = ctx.settings.reproduce_bugs;
                exec.update_bug_buckets(&candidate, &code, "main_driver", reproduce, None, false)
                    .await?;
            }
            Some(_) => {}
        }

        last_failure = failure.expect("invalid rendering has a failure kind");
        last_response = final_response;

        if abandon_candidate {
            break;
        }
    }

    Ok(RenderedSequence::invalid(candidate, last_failure, last_response))
}

/// Build the generation's candidate list in deterministic order.
fn extend(ctx: &FuzzingContext, seeds: &[Sequence]) -> Vec<Sequence> {
    let mut candidates = Vec::new();
    for request in ctx.collection.fuzzing_requests() {
        for seed in seeds {
            let produced = seed.all_produced();
            if request.consumes().is_subset(&produced) {
                candidates.push(seed.extended(request.clone()));
            }
        }
    }
    candidates
}

/// One worker's share of a generation: render each candidate, run the
/// checkers, and report which candidates reached validity.
async fn worker_pass(
    ctx: FuzzingContext,
    worker_id: usize,
    candidates: Vec<Sequence>,
) -> Result<(Vec<Option<Sequence>>, usize, bool)> {
    let mut exec = RequestExecutor::new(ctx.clone(), worker_id)?;
    let mut checkers = build_checkers(&ctx);
    let mut outcomes = Vec::with_capacity(candidates.len());
    let mut rendered_count = 0;

    for candidate in candidates {
        match render_sequence(&mut exec, candidate).await {
            Ok(rendered) => {
                rendered_count += 1;
                apply_checkers(&mut checkers, &rendered, &mut exec).await?;
                outcomes.push(rendered.valid.then_some(rendered.sequence));
            }
            Err(e) if e.is_time_budget() => return Ok((outcomes, rendered_count, true)),
            Err(e) => return Err(e),
        }
    }
    Ok((outcomes, rendered_count, false))
}

/// Run the full fuzzing loop: preprocessing, generation-by-generation
/// expansion with checkers and garbage collection, and final artifacts.
pub async fn generate_sequences(ctx: &FuzzingContext) -> Result<FuzzingSummary> {
    let n_workers = ctx.settings.fuzzing_jobs.max(1);

    let mut service_exec = RequestExecutor::new(ctx.clone(), n_workers)?;
    run_preprocessing(ctx, &mut service_exec).await?;

    {
        let mut state = ctx.state.lock();
        state.monitor.renderings.reset();
        state.monitor.reset_start_time();
        state.monitor.set_time_budget(ctx.settings.time_budget());
        state
            .monitor
            .renderings
            .set_memoize_invalid_past_renderings(ctx.settings.memoize_invalid_past_renderings);
    }

    // Timer-driven collection pass, independent of generation boundaries.
    let gc_task = {
        let ctx = ctx.clone();
        let interval =
            std::time::Duration::from_secs(ctx.settings.garbage_collection.interval_secs.max(1));
        let worker_id = n_workers + 1;
        tokio::spawn(async move {
            let Ok(mut gc_exec) = RequestExecutor::new(ctx, worker_id) else {
                return;
            };
            loop {
                tokio::time::sleep(interval).await;
                if run_garbage_collection(&mut gc_exec).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut seeds = vec![Sequence::empty()];
    let mut total_sequences = 0;
    let mut generation: u64 = 0;
    let mut stopped_on_time_budget = false;

    while generation < ctx.settings.max_sequence_length {
        generation += 1;
        {
            let mut state = ctx.state.lock();
            state.monitor.set_current_generation(generation);
        }

        let candidates = extend(ctx, &seeds);
        if candidates.is_empty() {
            info!(generation, "no extendable candidates, stopping");
            generation -= 1;
            break;
        }
        info!(generation, candidates = candidates.len(), "expanding generation");

        // Round-robin the candidates across workers; join is the barrier.
        let mut chunks: Vec<Vec<Sequence>> = (0..n_workers).map(|_| Vec::new()).collect();
        for (i, candidate) in candidates.into_iter().enumerate() {
            chunks[i % n_workers].push(candidate);
        }

        let mut tasks = Vec::new();
        for (worker_id, chunk) in chunks.into_iter().enumerate() {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(worker_pass(ctx, worker_id, chunk)));
        }

        let mut per_worker = Vec::new();
        for (worker_id, task) in tasks.into_iter().enumerate() {
            let joined = task.await.map_err(|_| EngineError::WorkerPanic(worker_id))?;
            per_worker.push(joined?);
        }

        // Reassemble candidate order: candidate i went to worker i % n.
        let mut next_seeds = Vec::new();
        let mut seen = HashSet::new();
        let max_len = per_worker.iter().map(|(o, _, _)| o.len()).max().unwrap_or(0);
        for position in 0..max_len {
            for (outcomes, _, _) in &per_worker {
                if let Some(Some(sequence)) = outcomes.get(position) {
                    if seen.insert(sequence.hex_definition()) {
                        next_seeds.push(sequence.clone());
                    }
                }
            }
        }
        for (_, count, timed_out) in &per_worker {
            total_sequences += *count;
            stopped_on_time_budget |= *timed_out;
        }

        if stopped_on_time_budget {
            info!("time budget exhausted, stopping");
            break;
        }

        // Collection pass after the generation barrier.
        match run_garbage_collection(&mut service_exec).await {
            Ok(deleted) if deleted > 0 => debug!(deleted, "garbage collection pass"),
            Ok(_) => {}
            Err(e) if e.is_time_budget() => {
                stopped_on_time_budget = true;
                break;
            }
            Err(e) => return Err(e),
        }

        if next_seeds.is_empty() {
            info!(generation, "no sequence reached a fully-valid final request, stopping");
            break;
        }
        seeds = next_seeds;
    }

    gc_task.abort();

    let (bug_buckets, requests_sent) = {
        let state = ctx.state.lock();
        if let Err(e) = state.speccov.write_to(&ctx.settings.speccov_path()) {
            warn!(error = %e, "failed to write speccov output");
        }
        let request_hexes: Vec<&str> =
            ctx.collection.iter().map(|r| r.hex_definition()).collect();
        let rendered = state.monitor.renderings.num_fully_rendered_requests(request_hexes);
        info!(
            rendered,
            total = ctx.collection.len(),
            "requests rendered at least once"
        );
        (state.bug_buckets.num_bug_buckets(), state.monitor.status_codes.num_requests_sent())
    };

    Ok(FuzzingSummary {
        total_sequences,
        generations: generation,
        bug_buckets,
        requests_sent,
        stopped_on_time_budget,
    })
}
