//! Request building blocks
//!
//! A request body is an ordered list of primitives. Static primitives
//! contribute fixed bytes; fuzzable primitives contribute one value per
//! rendering combination; reader and auth primitives render as placeholder
//! markers that are substituted later (dependency resolution happens per
//! sequence, auth substitution at send time).

use serde::{Deserialize, Serialize};

/// Delimiter wrapped around dynamic variable names in rendered payloads.
///
/// A reader renders as `_READER_DELIM_<name>_READER_DELIM_`, so splitting a
/// payload on this string yields variable names at the odd indices.
pub const RDELIM: &str = "_READER_DELIM_";

/// Placeholder substituted with the current auth header block at send time.
pub const AUTH_MARKER: &str = "_AUTH_TOKEN_DELIM_";

/// Wraps `name` in reader delimiters.
pub fn reader_marker(name: &str) -> String {
    format!("{RDELIM}{name}{RDELIM}")
}

/// The value kind of a fuzzable primitive, used to key the candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    String,
    Int,
    Number,
    Bool,
    Date,
    DateTime,
    Uuid4,
    Object,
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
            Self::Date => write!(f, "date"),
            Self::DateTime => write!(f, "datetime"),
            Self::Uuid4 => write!(f, "uuid4"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// One building block of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Primitive {
    /// Fixed bytes; contributes nothing to the combination space
    StaticString {
        value: String,
    },
    /// Static, but distinguished for logging and endpoint reconstruction
    Basepath {
        value: String,
    },
    FuzzableString {
        default: String,
        #[serde(default)]
        quoted: bool,
        #[serde(default)]
        examples: Vec<String>,
    },
    FuzzableInt {
        default: String,
        #[serde(default)]
        examples: Vec<String>,
    },
    FuzzableNumber {
        default: String,
        #[serde(default)]
        examples: Vec<String>,
    },
    FuzzableBool {
        default: String,
    },
    FuzzableDate {
        default: String,
        #[serde(default)]
        quoted: bool,
        #[serde(default)]
        examples: Vec<String>,
    },
    FuzzableDatetime {
        default: String,
        #[serde(default)]
        quoted: bool,
        #[serde(default)]
        examples: Vec<String>,
    },
    /// Renders a fresh v4 UUID on every rendering
    FuzzableUuid4 {
        #[serde(default)]
        quoted: bool,
    },
    FuzzableObject {
        default: String,
        #[serde(default)]
        examples: Vec<String>,
    },
    /// Explicit enumeration of values
    FuzzableGroup {
        tag: String,
        values: Vec<String>,
        #[serde(default)]
        quoted: bool,
    },
    /// Value supplied from the mutations dictionary by tag
    CustomPayload {
        tag: String,
        #[serde(default)]
        quoted: bool,
        #[serde(default)]
        writer: Option<String>,
    },
    /// Dictionary value with a fresh uuid4 suffix appended per rendering
    CustomPayloadUuid4Suffix {
        tag: String,
        #[serde(default)]
        writer: Option<String>,
    },
    /// Reads the current value of a dynamic variable at resolve time
    DynamicReader {
        variable: String,
        #[serde(default)]
        quoted: bool,
    },
    /// Replaced with the current auth header block at send time
    RefreshableAuth {
        tag: String,
    },
}

impl Primitive {
    /// True if this block enumerates candidate values and therefore
    /// participates in the rendering combination space.
    pub fn is_fuzzable(&self) -> bool {
        !matches!(
            self,
            Self::StaticString { .. }
                | Self::Basepath { .. }
                | Self::DynamicReader { .. }
                | Self::RefreshableAuth { .. }
        )
    }

    /// The candidate pool kind for plain fuzzable primitives.
    pub fn kind(&self) -> Option<PrimitiveKind> {
        match self {
            Self::FuzzableString { .. } => Some(PrimitiveKind::String),
            Self::FuzzableInt { .. } => Some(PrimitiveKind::Int),
            Self::FuzzableNumber { .. } => Some(PrimitiveKind::Number),
            Self::FuzzableBool { .. } => Some(PrimitiveKind::Bool),
            Self::FuzzableDate { .. } => Some(PrimitiveKind::Date),
            Self::FuzzableDatetime { .. } => Some(PrimitiveKind::DateTime),
            Self::FuzzableUuid4 { .. } => Some(PrimitiveKind::Uuid4),
            Self::FuzzableObject { .. } => Some(PrimitiveKind::Object),
            _ => None,
        }
    }

    /// The dynamic variable this block binds after a successful send, if any.
    pub fn writer(&self) -> Option<&str> {
        match self {
            Self::CustomPayload { writer, .. } | Self::CustomPayloadUuid4Suffix { writer, .. } => {
                writer.as_deref()
            }
            _ => None,
        }
    }

    /// The dynamic variable this block reads, if any.
    pub fn reader(&self) -> Option<&str> {
        match self {
            Self::DynamicReader { variable, .. } => Some(variable.as_str()),
            _ => None,
        }
    }

    /// Whether the rendered value is wrapped in double quotes.
    pub fn quoted(&self) -> bool {
        match self {
            Self::FuzzableString { quoted, .. }
            | Self::FuzzableDate { quoted, .. }
            | Self::FuzzableDatetime { quoted, .. }
            | Self::FuzzableUuid4 { quoted }
            | Self::FuzzableGroup { quoted, .. }
            | Self::CustomPayload { quoted, .. }
            | Self::DynamicReader { quoted, .. } => *quoted,
            _ => false,
        }
    }

    /// A short label used for tracked parameter logging.
    pub fn label(&self) -> String {
        match self {
            Self::FuzzableGroup { tag, .. }
            | Self::CustomPayload { tag, .. }
            | Self::CustomPayloadUuid4Suffix { tag, .. }
            | Self::RefreshableAuth { tag } => tag.clone(),
            Self::DynamicReader { variable, .. } => variable.clone(),
            other => other
                .kind()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "static".to_string()),
        }
    }
}

/// Wraps `value` in double quotes when `quoted` is set.
pub(crate) fn apply_quoting(value: &str, quoted: bool) -> String {
    if quoted {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
