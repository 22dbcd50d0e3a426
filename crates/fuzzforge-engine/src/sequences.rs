//! Request sequences
//!
//! A sequence is an ordered list of requests plus the record of what was
//! actually sent for each position: the resolved payload (auth placeholder
//! still in place so replays pick up fresh tokens), the chosen combination
//! id, the received response, and the async wait budget.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fuzzforge_grammar::Request;
use fuzzforge_transport::HttpResponse;

/// What was sent at one sequence position
#[derive(Debug, Clone)]
pub struct SentRequestData {
    /// Resolved payload with the auth marker still unsubstituted
    pub rendered_data: String,
    /// Which rendering combination produced the payload
    pub combination_id: u64,
    pub response: HttpResponse,
    pub max_async_wait: Duration,
}

/// Why a sequence rendering is invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFailureKind {
    /// A dynamic reader had no bound value
    DependencyResolution,
    /// A prefix request stopped being fully valid on replay
    ResourceCreation,
    /// The final response parser extracted nothing
    ResponseParsing,
    /// The final response carried a bug code
    BugCode,
    /// The final response was neither valid nor a bug (e.g. a 4xx)
    InvalidResponse,
}

/// An ordered list of requests with sent-data records
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub requests: Vec<Arc<Request>>,
    pub sent_request_data_list: Vec<SentRequestData>,
}

impl Sequence {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(requests: Vec<Arc<Request>>) -> Self {
        Self { requests, sent_request_data_list: Vec::new() }
    }

    pub fn length(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn last_request(&self) -> Option<&Arc<Request>> {
        self.requests.last()
    }

    /// Concatenated request hex definitions; the sequence identity.
    pub fn hex_definition(&self) -> String {
        self.requests.iter().map(|r| r.hex_definition()).collect()
    }

    /// Per-position produced variable sets.
    pub fn produces(&self) -> Vec<&BTreeSet<String>> {
        self.requests.iter().map(|r| r.produces()).collect()
    }

    /// Per-position consumed variable sets.
    pub fn consumes(&self) -> Vec<&BTreeSet<String>> {
        self.requests.iter().map(|r| r.consumes()).collect()
    }

    /// All variables produced anywhere in the sequence.
    pub fn all_produced(&self) -> BTreeSet<String> {
        self.requests.iter().flat_map(|r| r.produces().iter().cloned()).collect()
    }

    /// Whether any request is a destructor.
    pub fn has_destructor(&self) -> bool {
        self.requests.iter().any(|r| r.is_destructor())
    }

    /// A new sequence with `request` appended and sent data carried over.
    pub fn extended(&self, request: Arc<Request>) -> Self {
        let mut requests = self.requests.clone();
        requests.push(request);
        Self { requests, sent_request_data_list: self.sent_request_data_list.clone() }
    }

    /// Append one sent-data record.
    pub fn append_sent_data(&mut self, data: SentRequestData) {
        self.sent_request_data_list.push(data);
    }

    /// Drop sent-data records, keeping the request list.
    pub fn clear_sent_data(&mut self) {
        self.sent_request_data_list.clear();
    }

    /// The combination id each prefix position was sent at, defaulting to 1
    /// for positions without a record.
    pub fn combination_id_at(&self, index: usize) -> u64 {
        self.sent_request_data_list.get(index).map_or(1, |d| d.combination_id)
    }
}

/// The outcome of rendering a candidate sequence to completion
#[derive(Debug, Clone)]
pub struct RenderedSequence {
    pub sequence: Sequence,
    /// True when the final request was fully valid
    pub valid: bool,
    /// Why the last attempted rendering was invalid, when not valid
    pub failure: Option<RenderFailureKind>,
    /// The response to the final request of the last attempt
    pub final_response: Option<HttpResponse>,
}

impl RenderedSequence {
    pub fn valid(sequence: Sequence, final_response: HttpResponse) -> Self {
        Self { sequence, valid: true, failure: None, final_response: Some(final_response) }
    }

    pub fn invalid(
        sequence: Sequence,
        failure: RenderFailureKind,
        final_response: Option<HttpResponse>,
    ) -> Self {
        Self { sequence, valid: false, failure: Some(failure), final_response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzforge_grammar::{Primitive, RequestExamples};

    fn request(method: &str, endpoint: &str) -> Arc<Request> {
        Arc::new(
            Request::from_parts(
                endpoint.to_string(),
                method.to_string(),
                endpoint.to_string(),
                vec![Primitive::StaticString {
                    value: format!("{method} {endpoint} HTTP/1.1\r\n\r\n"),
                }],
                None,
                RequestExamples::default(),
                None,
                false,
            )
            .expect("request"),
        )
    }

    #[test]
    fn test_hex_definition_concatenates_requests() {
        let a = request("GET", "/a");
        let b = request("GET", "/b");
        let seq = Sequence::new(vec![a.clone(), b.clone()]);
        assert_eq!(
            seq.hex_definition(),
            format!("{}{}", a.hex_definition(), b.hex_definition())
        );
    }

    #[test]
    fn test_extended_preserves_sent_data() {
        let mut seq = Sequence::new(vec![request("GET", "/a")]);
        seq.append_sent_data(SentRequestData {
            rendered_data: "GET /a HTTP/1.1\r\n\r\n".to_string(),
            combination_id: 3,
            response: HttpResponse::from_raw("HTTP/1.1 200 OK\r\n\r\n"),
            max_async_wait: Duration::ZERO,
        });
        let extended = seq.extended(request("GET", "/b"));
        assert_eq!(extended.length(), 2);
        assert_eq!(extended.combination_id_at(0), 3);
        assert_eq!(extended.combination_id_at(1), 1);
    }
}
