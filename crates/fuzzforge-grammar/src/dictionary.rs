//! Mutations dictionary
//!
//! The dictionary supplies concrete values for fuzzable primitive kinds and
//! for custom payload tags. A second, optional set of shadow values carries
//! the same tags under a different identity and is used by the multi-tenant
//! namespace checker.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Deserialized mutations dictionary file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationsDictionary {
    #[serde(default)]
    pub fuzzable_string: Vec<String>,
    #[serde(default)]
    pub fuzzable_int: Vec<String>,
    #[serde(default)]
    pub fuzzable_number: Vec<String>,
    #[serde(default)]
    pub fuzzable_bool: Vec<String>,
    #[serde(default)]
    pub fuzzable_date: Vec<String>,
    #[serde(default)]
    pub fuzzable_datetime: Vec<String>,
    #[serde(default)]
    pub fuzzable_object: Vec<String>,
    /// Tag to value(s); a single string is accepted and treated as one value
    #[serde(default)]
    pub custom_payload: HashMap<String, PayloadValues>,
    /// Tag to prefix; a fresh uuid4 suffix is appended per rendering
    #[serde(default)]
    pub custom_payload_uuid4_suffix: HashMap<String, String>,
    /// Same tags as `custom_payload`, for the secondary (attacker) identity
    #[serde(default)]
    pub shadow_values: HashMap<String, String>,
}

/// One or many values for a custom payload tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValues {
    One(String),
    Many(Vec<String>),
}

impl PayloadValues {
    /// The values as a list, in dictionary order.
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v.clone()],
            Self::Many(vs) => vs.clone(),
        }
    }
}

impl MutationsDictionary {
    /// Load a dictionary from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
