//! Payload body checker
//!
//! Precondition: a valid sequence whose last request carries a JSON body
//! with a schema. The body is mutated structurally (required members
//! dropped, leaves type-confused, an invalid token appended) and each
//! variant is sent after rebuilding the prefix. Bug responses are bucketed
//! by the kind of divergence the mutated body shows against the schema.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use fuzzforge_grammar::{BodySchema, Request};
use fuzzforge_trace::TraceTags;

use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::sequences::{RenderedSequence, SentRequestData};
use crate::state::FuzzingContext;

use super::{execute_start_of_sequence, Checker};

const INVALID_JSON_STR: &str = "InvalidJson";

/// Deduplicates payload body findings per request by divergence kind
#[derive(Debug, Default)]
pub struct PayloadBodyBuckets {
    /// method+endpoint hex -> divergence strings already filed
    buckets: HashMap<String, HashSet<String>>,
}

impl PayloadBodyBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a mutated body against the request's schema and record it.
    /// Returns the divergence string the first time it is seen per request.
    pub fn add_bug(
        &mut self,
        request: &Request,
        mutated_body: &str,
        schema: &BodySchema,
    ) -> Option<String> {
        let error_str = Self::divergence(mutated_body, schema);
        let seen = self
            .buckets
            .entry(request.method_endpoint_hex_definition().to_string())
            .or_default();
        seen.insert(error_str.clone()).then_some(error_str)
    }

    fn divergence(mutated_body: &str, schema: &BodySchema) -> String {
        if serde_json::from_str::<Value>(mutated_body).is_err() {
            return INVALID_JSON_STR.to_string();
        }
        if let Some(node) = schema.has_type_mismatch(mutated_body) {
            return format!("TypeMismatch_{node}");
        }
        if let Some(node) = schema.has_struct_missing(mutated_body) {
            return format!("StructMissing_{node}");
        }
        "Other".to_string()
    }
}

/// Remove the member at a dot path; `None` when the path is absent.
fn remove_path(body: &Value, path: &str) -> Option<Value> {
    let mut mutated = body.clone();
    let mut current = &mut mutated;
    let components: Vec<&str> = path.split('.').collect();
    for component in &components[..components.len() - 1] {
        current = current.get_mut(component)?;
    }
    let last = components.last()?;
    current.as_object_mut()?.remove(*last)?;
    Some(mutated)
}

/// Replace the leaf at a dot path with a value of the wrong type.
fn confuse_path(body: &Value, path: &str, declared: &str) -> Option<Value> {
    let mut mutated = body.clone();
    let mut current = &mut mutated;
    for component in path.split('.') {
        current = current.get_mut(component)?;
    }
    *current = match declared {
        "string" => Value::from(0),
        "boolean" => Value::from("fuzzbool"),
        _ => Value::from("fuzzvalue"),
    };
    Some(mutated)
}

fn strip_content_length(head: &str) -> String {
    head.split("\r\n")
        .filter(|line| !line.to_ascii_lowercase().starts_with("content-length:"))
        .collect::<Vec<_>>()
        .join("\r\n")
}

pub struct PayloadBodyChecker;

impl PayloadBodyChecker {
    pub fn new(_ctx: &FuzzingContext) -> Self {
        Self
    }

    /// All structural mutations of a body, as raw strings. The last entry
    /// is deliberately unparseable.
    fn mutations(body: &Value, schema: &BodySchema) -> Vec<String> {
        let mut variants = Vec::new();
        for path in schema.required_paths() {
            if let Some(mutated) = remove_path(body, &path) {
                variants.push(mutated.to_string());
            }
        }
        for (path, declared) in schema.leaf_paths() {
            if let Some(mutated) = confuse_path(body, &path, &declared) {
                variants.push(mutated.to_string());
            }
        }
        variants.push(format!("{body}{{"));
        variants
    }
}

#[async_trait]
impl Checker for PayloadBodyChecker {
    fn friendly_name(&self) -> &'static str {
        "payloadbody"
    }

    // Mutation volume makes this opt-in.
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
        let seq = &rendered.sequence;
        let Some(last) = seq.last_request().cloned() else {
            return Ok(());
        };
        let Some(schema) = last.body_schema().cloned() else {
            return Ok(());
        };
        let Some(last_sent) = seq.sent_request_data_list.last().cloned() else {
            return Ok(());
        };

        // One pass per method+endpoint for the whole run.
        {
            let mut state = exec.ctx().state.lock();
            if !state.checker_state.mark_tested(
                self.friendly_name(),
                last.method_endpoint_hex_definition(),
            ) {
                return Ok(());
            }
        }

        let Some((head, body_text)) = last_sent.rendered_data.split_once("\r\n\r\n") else {
            return Ok(());
        };
        let Ok(body) = serde_json::from_str::<Value>(body_text) else {
            return Ok(());
        };
        let head = strip_content_length(head);

        let mut probe_seq = execute_start_of_sequence(exec, seq, self.friendly_name()).await?;
        probe_seq = probe_seq.extended(last.clone());

        let reproduce = exec.ctx().settings.reproduce_bugs;
        for mutated_body in Self::mutations(&body, &schema) {
            let payload = format!("{head}\r\n\r\n{mutated_body}");
            let tags = TraceTags {
                request_id: Some(last.request_id().to_string()),
                origin: Some(self.friendly_name().to_string()),
                ..Default::default()
            };
            let response = exec.send(&payload, self.friendly_name(), tags).await?;

            if response.has_bug_code(&exec.ctx().bug_codes) {
                let error_str = {
                    let mut state = exec.ctx().state.lock();
                    state.payload_buckets.add_bug(&last, &mutated_body, &schema)
                };
                if let Some(error_str) = error_str {
                    let mut bug_seq = probe_seq.clone();
                    bug_seq.append_sent_data(SentRequestData {
                        rendered_data: payload.clone(),
                        combination_id: last_sent.combination_id,
                        response: response.clone(),
                        max_async_wait: std::time::Duration::ZERO,
                    });
                    let code = response.status_code().unwrap_or_default().to_string();
                    exec.update_bug_buckets(
                        &bug_seq,
                        &code,
                        self.friendly_name(),
                        reproduce,
                        Some(&error_str),
                        false,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}
