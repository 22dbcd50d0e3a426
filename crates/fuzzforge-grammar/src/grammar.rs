//! Declarative grammar files
//!
//! A grammar file is a JSON document listing request definitions. Each
//! definition carries the primitive blocks that make up the request payload,
//! an optional declarative response parser, optional examples, an optional
//! body schema, and a create-once flag for preprocessing prerequisites.
//!
//! The engine treats the grammar purely as data; nothing in it executes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::body_schema::BodySchema;
use crate::error::{GrammarError, Result};
use crate::primitives::Primitive;
use crate::request::{Request, RequestCollection, RequestExamples, ResponseParserSpec};

/// Top-level grammar document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarFile {
    /// Grammar format version, reserved for future migrations
    #[serde(default)]
    pub version: Option<String>,
    pub requests: Vec<RequestDef>,
}

/// One request definition in a grammar file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDef {
    /// Endpoint template id shared by all methods on the endpoint
    pub request_id: String,
    pub method: String,
    /// Endpoint template, e.g. `/api/blog/posts/{postId}`
    pub endpoint: String,
    pub blocks: Vec<Primitive>,
    #[serde(default)]
    pub response_parser: Option<ResponseParserSpec>,
    #[serde(default)]
    pub examples: RequestExamples,
    #[serde(default)]
    pub body_schema: Option<BodySchema>,
    #[serde(default)]
    pub create_once: bool,
}

impl GrammarFile {
    /// Load and parse a grammar file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrammarError::GrammarParse(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse a grammar from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| GrammarError::GrammarParse(e.to_string()))
    }

    /// Materialize the request collection, preserving definition order.
    pub fn into_collection(self) -> Result<RequestCollection> {
        let mut collection = RequestCollection::new();
        for def in self.requests {
            let request = Request::from_parts(
                def.request_id,
                def.method,
                def.endpoint,
                def.blocks,
                def.response_parser,
                def.examples,
                def.body_schema,
                def.create_once,
            )?;
            collection.add_request(request);
        }
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAMMAR: &str = r#"{
        "requests": [
            {
                "request_id": "/a",
                "method": "PUT",
                "endpoint": "/a/a",
                "blocks": [
                    { "kind": "static_string", "value": "PUT " },
                    { "kind": "basepath", "value": "" },
                    { "kind": "static_string", "value": "/a/a HTTP/1.1\r\nHost: localhost\r\n\r\n" }
                ],
                "response_parser": {
                    "variables": [
                        { "variable": "_post_a", "path": "name" }
                    ]
                }
            },
            {
                "request_id": "/a/{name}",
                "method": "GET",
                "endpoint": "/a/{name}",
                "blocks": [
                    { "kind": "static_string", "value": "GET /a/" },
                    { "kind": "dynamic_reader", "variable": "_post_a" },
                    { "kind": "static_string", "value": " HTTP/1.1\r\nHost: localhost\r\n\r\n" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_grammar_round_trips_into_collection() {
        let grammar = GrammarFile::from_json(GRAMMAR).expect("parse");
        let collection = grammar.into_collection().expect("collection");
        assert_eq!(collection.len(), 2);

        let requests: Vec<_> = collection.iter().collect();
        assert_eq!(requests[0].method(), "PUT");
        assert!(requests[0].produces().contains("_post_a"));
        assert!(requests[1].consumes().contains("_post_a"));
    }

    #[test]
    fn test_malformed_grammar_is_a_parse_error() {
        assert!(matches!(
            GrammarFile::from_json("{\"requests\": 3}"),
            Err(GrammarError::GrammarParse(_))
        ));
    }
}
