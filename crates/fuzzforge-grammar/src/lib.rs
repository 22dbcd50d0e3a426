//! # FuzzForge Grammar
//!
//! Request grammar model for the FuzzForge stateful API fuzzer.
//!
//! This crate provides the typed building blocks that compose into fuzzable
//! HTTP requests and the machinery to enumerate their rendering combinations:
//!
//! - **Primitives**: static text, fuzzable values, custom payloads, dynamic
//!   readers, and the auth placeholder
//! - **Requests**: ordered primitive lists with derived producer/consumer
//!   sets and stable content hashes
//! - **Candidate values pool**: dictionary entries, examples, and value
//!   generators composed per primitive
//! - **Grammar files**: the declarative JSON format the engine loads
//! - **Body schemas**: divergence classification for payload mutations

pub mod body_schema;
pub mod candidate_values;
pub mod dictionary;
pub mod error;
pub mod grammar;
pub mod primitives;
pub mod request;

pub use body_schema::BodySchema;
pub use candidate_values::{CandidateValuesPool, GeneratorKey, ValueGenerator};
pub use dictionary::MutationsDictionary;
pub use error::{GrammarError, Result};
pub use grammar::{GrammarFile, RequestDef};
pub use primitives::{reader_marker, Primitive, PrimitiveKind, AUTH_MARKER, RDELIM};
pub use request::{
    str_to_hex_def, ExtractionSource, RenderIter, RenderedRequest, Request, RequestCollection,
    RequestExamples, ResponseParserSpec, VariableExtraction,
};
