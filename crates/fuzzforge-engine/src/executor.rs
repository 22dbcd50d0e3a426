//! Request executor
//!
//! One executor per fuzzing worker. It owns the worker's socket and network
//! log and layers the engine-side send pipeline on top of the transport:
//! time budget check, auth substitution, Content-Length fixup, trace
//! recording, response parser invocation, and bug bucket updates (including
//! the reproduction replay, which must run without the shared lock held).

use chrono::Utc;
use tracing::{debug, info, warn};

use fuzzforge_grammar::{Request, AUTH_MARKER};
use fuzzforge_trace::{BucketIndexEntry, NetworkLog, ReplayEntry, TraceRecord, TraceTags};
use fuzzforge_transport::{HttpResponse, HttpSock, TransportError};

use crate::bug_buckets::{bucket_origin, bug_hash, BugBucketEntry};
use crate::error::{EngineError, Result};
use crate::sequences::{SentRequestData, Sequence};
use crate::state::FuzzingContext;

/// Which identity's auth headers a send uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Primary,
    /// The secondary (attacker) identity of the namespace checker
    Shadow,
}

/// Outcome of invoking a request's response parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The request has no parser
    NoParser,
    /// At least this many variables were extracted
    Extracted(usize),
    /// A parser exists but nothing could be extracted
    Failed,
}

/// Outcome of sending one request of a sequence
#[derive(Debug)]
pub enum PositionOutcome {
    Sent {
        response: HttpResponse,
        /// Valid status code and the parser (if any) extracted variables
        fully_valid: bool,
        parser_failed: bool,
    },
    /// A dynamic reader had no bound value
    ResolveMiss { variable: String },
    /// The request needs auth but none is available; logged and skipped
    NoToken,
}

/// Per-worker send machinery
pub struct RequestExecutor {
    worker_id: usize,
    ctx: FuzzingContext,
    sock: HttpSock,
    network_log: Option<NetworkLog>,
}

impl RequestExecutor {
    pub fn new(ctx: FuzzingContext, worker_id: usize) -> Result<Self> {
        let sock = HttpSock::new(ctx.settings.connection.clone())?;
        let network_log = match &ctx.sinks.logs_dir {
            Some(dir) => Some(NetworkLog::create(dir, worker_id)?),
            None => None,
        };
        Ok(Self { worker_id, ctx, sock, network_log })
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn ctx(&self) -> &FuzzingContext {
        &self.ctx
    }

    fn check_time_budget(&self) -> Result<()> {
        if self.ctx.state.lock().monitor.time_budget_exhausted() {
            return Err(EngineError::TimeBudgetExceeded);
        }
        Ok(())
    }

    fn substitute_auth(&self, payload: &str, identity: Identity) -> Result<String> {
        let mut payload = if payload.contains(AUTH_MARKER) {
            let token = self.ctx.auth.current()?;
            let headers = match identity {
                Identity::Primary => token.primary_headers,
                Identity::Shadow => {
                    token.shadow_headers.ok_or(TransportError::NoToken)?
                }
            };
            payload.replace(AUTH_MARKER, &headers)
        } else {
            payload.to_string()
        };

        // Static custom payload identities: swap victim values for their
        // shadow counterparts.
        if identity == Identity::Shadow {
            for (tag, shadow_value) in self.ctx.pool.shadow_values() {
                if let Some(victim_value) = self.ctx.pool.custom_payload_value(tag) {
                    payload = payload.replace(victim_value, shadow_value);
                }
            }
        }
        Ok(payload)
    }

    /// Send raw payload bytes and record the exchange in every sink.
    pub async fn send(&mut self, payload: &str, origin: &str, tags: TraceTags) -> Result<HttpResponse> {
        self.send_as(payload, Identity::Primary, origin, tags).await
    }

    /// Send with an explicit identity.
    pub async fn send_as(
        &mut self,
        payload: &str,
        identity: Identity,
        origin: &str,
        tags: TraceTags,
    ) -> Result<HttpResponse> {
        self.check_time_budget()?;
        let payload = self.substitute_auth(payload, identity)?;
        let payload = finalize_payload(payload);

        if let Some(log) = &self.network_log {
            log.log_request(&payload);
        }
        let sent_at = Utc::now();
        let response = self.sock.send_recv(&payload).await;
        let received_at = Utc::now();
        if let Some(log) = &self.network_log {
            log.log_response(response.to_raw());
        }
        if let Some(db) = &self.ctx.sinks.trace_db {
            let record =
                TraceRecord::new(sent_at, received_at, &payload, response.to_raw(), tags);
            if let Err(e) = db.push(&record) {
                warn!(error = %e, "trace db write failed");
            }
        }
        self.ctx.state.lock().monitor.increment_requests_count(origin);
        Ok(response)
    }

    /// Invoke the request's response parser, binding extracted variables.
    pub fn apply_parser(&self, request: &Request, response: &HttpResponse) -> ParseOutcome {
        let Some(parser) = request.response_parser() else {
            return ParseOutcome::NoParser;
        };
        let json = response.json_body();
        let mut extracted = 0;
        let mut state = self.ctx.state.lock();
        for extraction in &parser.variables {
            let value = match extraction.source {
                fuzzforge_grammar::ExtractionSource::Header => {
                    response.header(&extraction.path).map(str::to_string)
                }
                fuzzforge_grammar::ExtractionSource::Body => {
                    json.as_ref().and_then(|body| walk_json_path(body, &extraction.path))
                }
            };
            if let Some(value) = value {
                state.dependencies.set_variable(&extraction.variable, &value);
                extracted += 1;
            }
        }
        if extracted == 0 {
            ParseOutcome::Failed
        } else {
            ParseOutcome::Extracted(extracted)
        }
    }

    /// Render, resolve, send, poll, and parse one request of a sequence,
    /// appending the sent data record on success.
    pub async fn send_request_at(
        &mut self,
        seq: &mut Sequence,
        request: &std::sync::Arc<Request>,
        combination_id: u64,
        origin: &str,
        identity: Identity,
        check_async: bool,
    ) -> Result<PositionOutcome> {
        let rendered = request.render_at(&self.ctx.pool, combination_id)?;

        let resolved = {
            let state = self.ctx.state.lock();
            state.dependencies.resolve(&rendered.payload)
        };
        let resolved = match resolved {
            Ok(data) => data,
            Err(miss) => {
                debug!(variable = %miss.variable, request = request.endpoint(), "dependency resolve miss");
                return Ok(PositionOutcome::ResolveMiss { variable: miss.variable });
            }
        };

        let tags = TraceTags {
            request_id: Some(request.request_id().to_string()),
            sequence_id: Some(seq.hex_definition()),
            combination_id: Some(combination_id),
            origin: Some(origin.to_string()),
        };
        let response = match self.send_as(&resolved, identity, origin, tags).await {
            Ok(response) => response,
            Err(EngineError::Transport(TransportError::NoToken)) => {
                warn!(request = request.endpoint(), "no auth token available, skipping request");
                return Ok(PositionOutcome::NoToken);
            }
            Err(e) => return Err(e),
        };

        let max_async_wait = self.ctx.settings.max_async_wait_for(request.request_id());
        let response_to_parse = if check_async {
            self.try_async_poll(&resolved, &response, max_async_wait).await?
        } else {
            response.clone()
        };

        if response.has_valid_code() {
            let mut state = self.ctx.state.lock();
            for (name, value) in &rendered.writer_bindings {
                state.dependencies.set_variable(name, value);
            }
        }
        let parse = self.apply_parser(request, &response_to_parse);
        let parser_failed = parse == ParseOutcome::Failed;
        let fully_valid = response.has_valid_code() && !parser_failed;

        seq.append_sent_data(SentRequestData {
            rendered_data: resolved,
            combination_id,
            response: response.clone(),
            max_async_wait,
        });

        Ok(PositionOutcome::Sent { response, fully_valid, parser_failed })
    }

    /// Re-send a sequence's stored payloads serially; the final status code
    /// decides reproducibility.
    pub async fn replay_sequence(&mut self, seq: &Sequence) -> Result<Option<String>> {
        let mut last_code = None;
        for data in &seq.sent_request_data_list {
            let tags = TraceTags {
                sequence_id: Some(seq.hex_definition()),
                origin: Some("replay".to_string()),
                ..Default::default()
            };
            let response = self.send(&data.rendered_data, "replay", tags).await?;
            last_code = response.status_code().map(str::to_string);
        }
        Ok(last_code)
    }

    /// File a bug, deduplicating, optionally reproducing, and writing the
    /// replay artifact.
    pub async fn update_bug_buckets(
        &mut self,
        seq: &Sequence,
        bug_code: &str,
        origin: &str,
        reproduce: bool,
        checker_str: Option<&str>,
        hash_full_request: bool,
    ) -> Result<()> {
        let class = bucket_origin(origin, bug_code);
        // Variant-carrying checkers (payload body divergences, example
        // payloads) fold their variant into the identity keys; without it,
        // distinct findings on one endpoint would collapse into the first,
        // since request hex definitions never see rendered content.
        let variant = checker_str.unwrap_or("");
        let sequence_hex = format!("{}{variant}", seq.hex_definition());
        let last_request_hex = format!(
            "{}{variant}",
            seq.last_request().map(|r| r.hex_definition()).unwrap_or_default()
        );

        {
            let state = self.ctx.state.lock();
            if state.bug_buckets.is_duplicate(&class, &sequence_hex)
                || state.bug_buckets.ending_request_exists(&class, &last_request_hex)
            {
                return Ok(());
            }
        }

        let mut reproducible = false;
        if reproduce {
            if let Some(log) = &self.network_log {
                log.log_marker("Attempting to reproduce bug...");
            }
            reproducible = self.replay_sequence(seq).await?.as_deref() == Some(bug_code);
        }

        let hash = bug_hash(&class, seq, hash_full_request, checker_str);
        info!(bucket = %class, bug_hash = %hash, reproducible, "bug bucket updated");
        {
            let mut state = self.ctx.state.lock();
            // A concurrent worker may have filed the same finding while we
            // were replaying.
            if state.bug_buckets.is_duplicate(&class, &sequence_hex)
                || state.bug_buckets.ending_request_exists(&class, &last_request_hex)
            {
                return Ok(());
            }
            state.bug_buckets.insert(BugBucketEntry {
                origin: origin.to_string(),
                bug_hash: hash.clone(),
                status_code: bug_code.to_string(),
                sequence_hex,
                last_request_hex,
                reproducible,
            });
        }

        self.write_replay_artifact(seq, &hash, &class, bug_code, reproducible)?;
        Ok(())
    }

    fn write_replay_artifact(
        &self,
        seq: &Sequence,
        hash: &str,
        class: &str,
        bug_code: &str,
        reproducible: bool,
    ) -> Result<()> {
        let Some(writer) = &self.ctx.sinks.replay else {
            return Ok(());
        };
        let header_lines: Vec<String> = seq
            .requests
            .iter()
            .map(|r| format!("{} {}", r.method(), r.endpoint()))
            .collect();

        let mut payloads = Vec::new();
        {
            let state = self.ctx.state.lock();
            for data in &state.create_once_data {
                payloads.push(ReplayEntry {
                    payload: data.rendered_data.clone(),
                    response: Some(data.response.to_raw().to_string()),
                });
            }
        }
        for data in &seq.sent_request_data_list {
            payloads.push(ReplayEntry {
                payload: data.rendered_data.clone(),
                response: Some(data.response.to_raw().to_string()),
            });
        }

        writer.write_bucket(
            BucketIndexEntry {
                origin: class.to_string(),
                bug_hash: hash.to_string(),
                status_code: bug_code.to_string(),
                reproducible,
                replay_file: String::new(),
            },
            &header_lines,
            &payloads,
        )?;
        Ok(())
    }
}

/// Insert a Content-Length header when the payload carries a body without
/// one; stream servers cannot frame the request otherwise.
pub(crate) fn finalize_payload(payload: String) -> String {
    let Some((head, body)) = payload.split_once("\r\n\r\n") else {
        return payload;
    };
    if body.is_empty() {
        return payload;
    }
    let has_length = head
        .split("\r\n")
        .any(|line| line.to_ascii_lowercase().starts_with("content-length:"));
    if has_length {
        return payload;
    }
    format!("{head}\r\nContent-Length: {}\r\n\r\n{body}", body.len())
}

/// Walk a dot-separated path through a JSON value; numeric components index
/// arrays. Extracted values are stringified without quotes.
pub(crate) fn walk_json_path(value: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = value;
    for component in path.split('.') {
        current = match component.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(component)?,
        };
    }
    Some(match current {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_walk_json_path_objects_and_arrays() {
        let value = json!({"items": [{"id": 7}], "name": "x"});
        assert_eq!(walk_json_path(&value, "name"), Some("x".to_string()));
        assert_eq!(walk_json_path(&value, "items.0.id"), Some("7".to_string()));
        assert_eq!(walk_json_path(&value, "items.1.id"), None);
        assert_eq!(walk_json_path(&value, "missing"), None);
    }

    #[test]
    fn test_finalize_payload_adds_content_length() {
        let payload = "POST /a HTTP/1.1\r\nHost: x\r\n\r\n{\"a\":1}".to_string();
        let finalized = finalize_payload(payload);
        assert!(finalized.contains("Content-Length: 7\r\n"));
    }

    #[test]
    fn test_finalize_payload_leaves_existing_length() {
        let payload = "POST /a HTTP/1.1\r\nContent-Length: 7\r\n\r\n{\"a\":1}".to_string();
        assert_eq!(finalize_payload(payload.clone()), payload);
    }

    #[test]
    fn test_finalize_payload_skips_bodyless_requests() {
        let payload = "GET /a HTTP/1.1\r\nHost: x\r\n\r\n".to_string();
        assert_eq!(finalize_payload(payload.clone()), payload);
    }
}
