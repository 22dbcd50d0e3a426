//! Request body schema
//!
//! A lightweight JSON-schema subset (`type`, `properties`, `required`,
//! `items`) attached to requests with a body. The payload body checker uses
//! it twice: to enumerate mutation targets (required members, typed leaves)
//! and to classify how a mutated body diverges from the schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema wrapper for a request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodySchema {
    schema: Value,
}

impl BodySchema {
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }

    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Dot paths of all required members, depth first.
    pub fn required_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_required(&self.schema, "", &mut paths);
        paths
    }

    /// Dot paths of all typed leaves with their declared type.
    pub fn leaf_paths(&self) -> Vec<(String, String)> {
        let mut paths = Vec::new();
        collect_leaves(&self.schema, "", &mut paths);
        paths
    }

    /// First leaf whose value type diverges from the schema, as a dot path.
    pub fn has_type_mismatch(&self, body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        find_type_mismatch(&self.schema, &value, "")
    }

    /// First required member missing from the body, as a dot path.
    pub fn has_struct_missing(&self, body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        find_struct_missing(&self.schema, &value, "")
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

fn properties(schema: &Value) -> Option<&serde_json::Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

fn required_names(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn collect_required(schema: &Value, prefix: &str, out: &mut Vec<String>) {
    let Some(props) = properties(schema) else {
        return;
    };
    let required = required_names(schema);
    for (name, child) in props {
        let path = join(prefix, name);
        if required.contains(&name.as_str()) {
            out.push(path.clone());
        }
        collect_required(child, &path, out);
        if schema_type(child) == Some("array") {
            if let Some(items) = child.get("items") {
                collect_required(items, &path, out);
            }
        }
    }
}

fn collect_leaves(schema: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match schema_type(schema) {
        Some("object") => {
            if let Some(props) = properties(schema) {
                for (name, child) in props {
                    collect_leaves(child, &join(prefix, name), out);
                }
            }
        }
        Some("array") => {
            if let Some(items) = schema.get("items") {
                collect_leaves(items, prefix, out);
            }
        }
        Some(leaf) => out.push((prefix.to_string(), leaf.to_string())),
        None => {}
    }
}

fn value_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn find_type_mismatch(schema: &Value, value: &Value, prefix: &str) -> Option<String> {
    match schema_type(schema) {
        Some("object") => {
            if !value.is_object() {
                return Some(prefix.to_string());
            }
            let props = properties(schema)?;
            for (name, child) in props {
                if let Some(member) = value.get(name) {
                    if let Some(path) = find_type_mismatch(child, member, &join(prefix, name)) {
                        return Some(path);
                    }
                }
            }
            None
        }
        Some("array") => {
            let Value::Array(elements) = value else {
                return Some(prefix.to_string());
            };
            let items = schema.get("items")?;
            for element in elements {
                if let Some(path) = find_type_mismatch(items, element, prefix) {
                    return Some(path);
                }
            }
            None
        }
        Some(declared) => {
            // Null stands for an intentionally absent value, not a confusion.
            if value.is_null() || value_matches(declared, value) {
                None
            } else {
                Some(prefix.to_string())
            }
        }
        None => None,
    }
}

fn find_struct_missing(schema: &Value, value: &Value, prefix: &str) -> Option<String> {
    if schema_type(schema) == Some("array") {
        let items = schema.get("items")?;
        if let Value::Array(elements) = value {
            for element in elements {
                if let Some(path) = find_struct_missing(items, element, prefix) {
                    return Some(path);
                }
            }
        }
        return None;
    }

    let props = properties(schema)?;
    let object = value.as_object()?;
    for name in required_names(schema) {
        if !object.contains_key(name) {
            return Some(join(prefix, name));
        }
    }
    for (name, child) in props {
        if let Some(member) = object.get(name) {
            if let Some(path) = find_struct_missing(child, member, &join(prefix, name)) {
                return Some(path);
            }
        }
    }
    None
}
