//! Examples checker
//!
//! For requests carrying compiler-attached examples, each body and query
//! example is substituted into the last request and sent once per request
//! for the whole run. Bug responses are filed hashed over the full request,
//! so distinct example payloads of one endpoint stay distinct buckets.

use async_trait::async_trait;

use fuzzforge_grammar::str_to_hex_def;
use fuzzforge_trace::TraceTags;

use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::sequences::{RenderedSequence, SentRequestData};
use crate::state::FuzzingContext;

use super::{execute_start_of_sequence, Checker};

pub struct ExamplesChecker;

impl ExamplesChecker {
    pub fn new(_ctx: &FuzzingContext) -> Self {
        Self
    }

    /// Replace the payload body with an example body.
    fn substitute_body(payload: &str, example_body: &str) -> Option<String> {
        let (head, _) = payload.split_once("\r\n\r\n")?;
        let head: String = head
            .split("\r\n")
            .filter(|line| !line.to_ascii_lowercase().starts_with("content-length:"))
            .collect::<Vec<_>>()
            .join("\r\n");
        Some(format!("{head}\r\n\r\n{example_body}"))
    }

    /// Replace (or insert) the query string of the request line.
    fn substitute_query(payload: &str, example_query: &str) -> Option<String> {
        let (request_line, rest) = payload.split_once("\r\n")?;
        let (target, protocol) = request_line.rsplit_once(" HTTP")?;
        let base = target.split('?').next().unwrap_or(target);
        Some(format!("{base}?{example_query} HTTP{protocol}\r\n{rest}"))
    }
}

#[async_trait]
impl Checker for ExamplesChecker {
    fn friendly_name(&self) -> &'static str {
        "examples"
    }

    // Example sweeps add traffic proportional to the example sets.
    fn default_enabled(&self) -> bool {
        false
    }

    async fn apply(
        &mut self,
        rendered: &RenderedSequence,
        exec: &mut RequestExecutor,
    ) -> Result<()> {
        // Applies to valid and invalid renderings alike.
        let seq = &rendered.sequence;
        let Some(last) = seq.last_request().cloned() else {
            return Ok(());
        };
        if last.examples().is_empty() {
            return Ok(());
        }
        let Some(last_sent) = seq.sent_request_data_list.last().cloned() else {
            return Ok(());
        };

        let test_key = format!("{}{}", str_to_hex_def(last.method()), last.request_id());
        {
            let mut state = exec.ctx().state.lock();
            if !state.checker_state.mark_tested(self.friendly_name(), &test_key) {
                return Ok(());
            }
        }

        let prefix = execute_start_of_sequence(exec, seq, self.friendly_name()).await?;
        let reproduce = exec.ctx().settings.reproduce_bugs;

        // Each payload keeps a variant key hashed from its example content,
        // so distinct examples of one endpoint stay distinct findings.
        let mut substituted: Vec<(String, String)> = Vec::new();
        for body_example in &last.examples().body_examples {
            if let Some(payload) = Self::substitute_body(&last_sent.rendered_data, body_example) {
                substituted.push((payload, str_to_hex_def(body_example)));
            }
        }
        for query_example in &last.examples().query_examples {
            if let Some(payload) = Self::substitute_query(&last_sent.rendered_data, query_example)
            {
                substituted.push((payload, str_to_hex_def(query_example)));
            }
        }

        for (payload, variant) in substituted {
            let tags = TraceTags {
                request_id: Some(last.request_id().to_string()),
                origin: Some(self.friendly_name().to_string()),
                ..Default::default()
            };
            let response = exec.send(&payload, self.friendly_name(), tags).await?;

            if response.has_bug_code(&exec.ctx().bug_codes) {
                let mut bug_seq = prefix.clone().extended(last.clone());
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
                    Some(&variant),
                    true,
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
    fn test_substitute_body_replaces_and_drops_stale_length() {
        let payload =
            "POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 7\r\n\r\n{\"a\":1}".to_string();
        let substituted =
            ExamplesChecker::substitute_body(&payload, r#"{"example": true}"#).expect("body");
        assert!(substituted.ends_with("\r\n\r\n{\"example\": true}"));
        assert!(!substituted.contains("Content-Length"));
    }

    #[test]
    fn test_substitute_query_replaces_existing() {
        let payload = "GET /a?page=1 HTTP/1.1\r\nHost: x\r\n\r\n".to_string();
        let substituted =
            ExamplesChecker::substitute_query(&payload, "page=9&sort=asc").expect("query");
        assert!(substituted.starts_with("GET /a?page=9&sort=asc HTTP/1.1\r\n"));
    }

    #[test]
    fn test_substitute_query_inserts_when_absent() {
        let payload = "GET /a HTTP/1.1\r\nHost: x\r\n\r\n".to_string();
        let substituted = ExamplesChecker::substitute_query(&payload, "q=1").expect("query");
        assert!(substituted.starts_with("GET /a?q=1 HTTP/1.1\r\n"));
    }
}
