//! Request model and rendering
//!
//! A `Request` is an ordered list of primitives plus derived metadata: the
//! dynamic variables it produces (via its response parser and payload
//! writers), the variables it consumes (via dynamic readers), and stable
//! content hashes used by the monitors and bug buckets.
//!
//! A request with N fuzzable primitives exposes a combination space, the
//! Cartesian product of each primitive's candidate values with the last
//! primitive varying fastest. Combinations are identified by a 1-based
//! `combination_id`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::body_schema::BodySchema;
use crate::candidate_values::CandidateValuesPool;
use crate::error::{GrammarError, Result};
use crate::primitives::{apply_quoting, reader_marker, Primitive, AUTH_MARKER};

/// Stable content hash used for request and sequence identity.
pub fn str_to_hex_def(value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Where a parser extracts a dynamic variable from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    #[default]
    Body,
    Header,
}

/// One dynamic variable extraction rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableExtraction {
    /// The dynamic variable to bind
    pub variable: String,
    /// Dot-separated path into the JSON body, or a header name
    pub path: String,
    #[serde(default)]
    pub source: ExtractionSource,
}

/// Declarative response parser: which variables to pull from a response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseParserSpec {
    pub variables: Vec<VariableExtraction>,
}

impl ResponseParserSpec {
    /// Variable names this parser writes.
    pub fn writes(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.variable.as_str())
    }
}

/// Example payloads attached to a request by the grammar compiler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestExamples {
    /// Raw JSON body examples
    #[serde(default)]
    pub body_examples: Vec<String>,
    /// Full query strings (without the leading `?`)
    #[serde(default)]
    pub query_examples: Vec<String>,
}

impl RequestExamples {
    /// True when no examples are attached.
    pub fn is_empty(&self) -> bool {
        self.body_examples.is_empty() && self.query_examples.is_empty()
    }
}

/// A single fuzzable HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    request_id: String,
    method: String,
    endpoint: String,
    blocks: Vec<Primitive>,
    response_parser: Option<ResponseParserSpec>,
    examples: RequestExamples,
    body_schema: Option<BodySchema>,
    create_once: bool,
    produces: BTreeSet<String>,
    consumes: BTreeSet<String>,
    hex_definition: String,
    method_endpoint_hex_definition: String,
}

impl Request {
    /// Assemble a request and derive its metadata.
    ///
    /// Fails when a variable appears as both a producer and a consumer of the
    /// same request.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        request_id: String,
        method: String,
        endpoint: String,
        blocks: Vec<Primitive>,
        response_parser: Option<ResponseParserSpec>,
        examples: RequestExamples,
        body_schema: Option<BodySchema>,
        create_once: bool,
    ) -> Result<Self> {
        let mut produces: BTreeSet<String> = BTreeSet::new();
        if let Some(parser) = &response_parser {
            produces.extend(parser.writes().map(str::to_string));
        }
        for block in &blocks {
            if let Some(writer) = block.writer() {
                produces.insert(writer.to_string());
            }
        }
        let consumes: BTreeSet<String> =
            blocks.iter().filter_map(|b| b.reader().map(str::to_string)).collect();

        if let Some(overlap) = produces.intersection(&consumes).next() {
            return Err(GrammarError::ProducerConsumerOverlap {
                request_id,
                variable: overlap.clone(),
            });
        }

        let block_json = serde_json::to_string(&blocks)?;
        let hex_definition = str_to_hex_def(&format!("{method} {endpoint} {block_json}"));
        let method_endpoint_hex_definition = str_to_hex_def(&format!("{method} {endpoint}"));

        Ok(Self {
            request_id,
            method,
            endpoint,
            blocks,
            response_parser,
            examples,
            body_schema,
            create_once,
            produces,
            consumes,
            hex_definition,
            method_endpoint_hex_definition,
        })
    }

    /// Identifier shared by every method on the same endpoint template.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The endpoint template, e.g. `/api/blog/posts/{postId}`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The endpoint template with dynamic object segments left as names.
    pub fn endpoint_no_dynamic_objects(&self) -> &str {
        &self.endpoint
    }

    pub fn blocks(&self) -> &[Primitive] {
        &self.blocks
    }

    pub fn response_parser(&self) -> Option<&ResponseParserSpec> {
        self.response_parser.as_ref()
    }

    pub fn examples(&self) -> &RequestExamples {
        &self.examples
    }

    pub fn body_schema(&self) -> Option<&BodySchema> {
        self.body_schema.as_ref()
    }

    /// True for requests executed once during preprocessing.
    pub fn create_once(&self) -> bool {
        self.create_once
    }

    /// Dynamic variables written by this request.
    pub fn produces(&self) -> &BTreeSet<String> {
        &self.produces
    }

    /// Dynamic variables read by this request.
    pub fn consumes(&self) -> &BTreeSet<String> {
        &self.consumes
    }

    pub fn hex_definition(&self) -> &str {
        &self.hex_definition
    }

    pub fn method_endpoint_hex_definition(&self) -> &str {
        &self.method_endpoint_hex_definition
    }

    /// A destructor deletes a dynamic object it consumes.
    pub fn is_destructor(&self) -> bool {
        self.method.eq_ignore_ascii_case("DELETE") && !self.consumes.is_empty()
    }

    /// Whether the request carries the auth placeholder.
    pub fn requires_auth(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, Primitive::RefreshableAuth { .. }))
    }

    /// The request path with reader markers in place of dynamic objects.
    ///
    /// Used by checkers that need to locate dynamic object values inside a
    /// previously sent request line by path segment position.
    pub fn path_template(&self) -> String {
        let mut text = String::new();
        for block in &self.blocks {
            match block {
                Primitive::StaticString { value } | Primitive::Basepath { value } => {
                    text.push_str(value);
                }
                Primitive::DynamicReader { variable, .. } => {
                    text.push_str(&reader_marker(variable));
                }
                _ => {
                    // Fuzzable blocks in the path keep their shape via a
                    // placeholder; only segment positions matter here.
                    text.push_str("_");
                }
            }
            if text.contains(" HTTP") {
                break;
            }
        }
        let line = text.split(" HTTP").next().unwrap_or("");
        let path = line.splitn(2, ' ').nth(1).unwrap_or(line);
        path.split('?').next().unwrap_or(path).to_string()
    }

    fn candidate_matrix(&self, pool: &CandidateValuesPool) -> Result<Vec<(usize, Vec<String>)>> {
        let mut matrix = Vec::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.is_fuzzable() {
                matrix.push((idx, pool.candidate_values(block)?));
            }
        }
        Ok(matrix)
    }

    /// Number of rendering combinations this request exposes, capped.
    pub fn combination_count(&self, pool: &CandidateValuesPool, cap: Option<u64>) -> Result<u64> {
        let matrix = self.candidate_matrix(pool)?;
        let mut total: u64 = 1;
        for (_, values) in &matrix {
            total = total.saturating_mul(values.len() as u64);
        }
        Ok(match cap {
            Some(cap) => total.min(cap),
            None => total,
        })
    }

    /// Render a specific combination without touching any cursor state.
    ///
    /// `combination_id` is 1-based; the last fuzzable primitive varies
    /// fastest across consecutive ids.
    pub fn render_at(
        &self,
        pool: &CandidateValuesPool,
        combination_id: u64,
    ) -> Result<RenderedRequest> {
        let matrix = self.candidate_matrix(pool)?;
        render_combination(self, &matrix, combination_id)
    }

    /// Iterate rendering combinations, starting after `skip` already-tried ones.
    pub fn render_iter<'a>(
        &'a self,
        pool: &CandidateValuesPool,
        skip: u64,
        cap: Option<u64>,
    ) -> Result<RenderIter<'a>> {
        let matrix = self.candidate_matrix(pool)?;
        let mut total: u64 = 1;
        for (_, values) in &matrix {
            total = total.saturating_mul(values.len() as u64);
        }
        if let Some(cap) = cap {
            total = total.min(cap);
        }
        Ok(RenderIter { request: self, matrix, next_id: skip + 1, total })
    }
}

/// A rendered combination of a request
#[derive(Debug, Clone)]
pub struct RenderedRequest {
    /// 1-based id of this combination
    pub combination_id: u64,
    /// Payload bytes with reader/auth markers still in place
    pub payload: String,
    /// Dynamic variables to bind (name, value) once the send succeeds
    pub writer_bindings: Vec<(String, String)>,
    /// Chosen value per fuzzable primitive, for logging
    pub tracked_parameters: Vec<(String, String)>,
}

fn render_combination(
    request: &Request,
    matrix: &[(usize, Vec<String>)],
    combination_id: u64,
) -> Result<RenderedRequest> {
    if combination_id == 0 {
        return Err(GrammarError::CombinationOutOfRange(combination_id));
    }
    // Decode the 0-based index in mixed radix, last position fastest.
    let mut rem = combination_id - 1;
    let mut chosen = vec![0usize; matrix.len()];
    for (slot, (_, values)) in matrix.iter().enumerate().rev() {
        let len = values.len() as u64;
        chosen[slot] = (rem % len) as usize;
        rem /= len;
    }
    if rem > 0 {
        return Err(GrammarError::CombinationOutOfRange(combination_id));
    }

    let mut payload = String::new();
    let mut writer_bindings = Vec::new();
    let mut tracked_parameters = Vec::new();
    let mut slot = 0;

    for block in request.blocks() {
        match block {
            Primitive::StaticString { value } | Primitive::Basepath { value } => {
                payload.push_str(value);
            }
            Primitive::DynamicReader { variable, quoted } => {
                payload.push_str(&apply_quoting(&reader_marker(variable), *quoted));
            }
            Primitive::RefreshableAuth { .. } => {
                payload.push_str(AUTH_MARKER);
            }
            fuzzable => {
                let (_, values) = &matrix[slot];
                let mut value = values[chosen[slot]].clone();
                slot += 1;
                match fuzzable {
                    Primitive::FuzzableUuid4 { .. } => {
                        value = uuid::Uuid::new_v4().to_string();
                    }
                    Primitive::CustomPayloadUuid4Suffix { .. } => {
                        let suffix = uuid::Uuid::new_v4().simple().to_string();
                        value = format!("{value}{}", &suffix[..10]);
                    }
                    _ => {}
                }
                if let Some(writer) = fuzzable.writer() {
                    writer_bindings.push((writer.to_string(), value.clone()));
                }
                tracked_parameters.push((fuzzable.label(), value.clone()));
                payload.push_str(&apply_quoting(&value, fuzzable.quoted()));
            }
        }
    }

    Ok(RenderedRequest { combination_id, payload, writer_bindings, tracked_parameters })
}

/// Lazy iterator over a request's rendering combinations
pub struct RenderIter<'a> {
    request: &'a Request,
    matrix: Vec<(usize, Vec<String>)>,
    next_id: u64,
    total: u64,
}

impl RenderIter<'_> {
    /// Total combinations (after the cap), independent of position.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Iterator for RenderIter<'_> {
    type Item = RenderedRequest;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_id > self.total {
            return None;
        }
        let rendered = render_combination(self.request, &self.matrix, self.next_id).ok()?;
        self.next_id += 1;
        Some(rendered)
    }
}

/// The ordered collection of requests loaded from a grammar
#[derive(Debug, Default, Clone)]
pub struct RequestCollection {
    requests: Vec<Arc<Request>>,
}

impl RequestCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request, preserving grammar order.
    pub fn add_request(&mut self, request: Request) {
        self.requests.push(Arc::new(request));
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Request>> {
        self.requests.iter()
    }

    /// All requests sharing an endpoint template id.
    pub fn requests_for_id(&self, request_id: &str) -> Vec<Arc<Request>> {
        self.requests.iter().filter(|r| r.request_id() == request_id).cloned().collect()
    }

    /// The first destructor that consumes `variable`, in grammar order.
    pub fn destructor_for(&self, variable: &str) -> Option<Arc<Request>> {
        self.requests
            .iter()
            .find(|r| r.is_destructor() && r.consumes().contains(variable))
            .cloned()
    }

    /// Requests executed during preprocessing.
    pub fn create_once_requests(&self) -> Vec<Arc<Request>> {
        self.requests.iter().filter(|r| r.create_once()).cloned().collect()
    }

    /// Requests participating in the fuzzing loop.
    pub fn fuzzing_requests(&self) -> Vec<Arc<Request>> {
        self.requests.iter().filter(|r| !r.create_once()).cloned().collect()
    }
}
