//! HTTP response wrapper and status classification
//!
//! The transport hands back the raw response text with the body already
//! framed (Content-Length, chunked, or connection close). This module parses
//! the status line and headers out of it and classifies status codes as
//! valid or bug-indicating.
//!
//! Three pseudo-codes never travel on the wire: `599` for a request timeout,
//! `598` for a connection closed mid-exchange, and `999` for a request that
//! was never sent because its sequence failed earlier.

use regex::Regex;

use crate::error::{Result, TransportError};

/// Status codes treated as a valid response
pub const VALID_CODES: [&str; 5] = ["200", "201", "202", "204", "304"];

/// Pseudo-code for a request that timed out
pub const TIMEOUT_CODE: &str = "599";
/// Pseudo-code for a connection closed during send/receive
pub const CONNECTION_CLOSED_CODE: &str = "598";
/// Pseudo-code for a request that was never sent
pub const NEVER_SENT_CODE: &str = "999";

const HEADER_DELIM: &str = "\r\n\r\n";

/// Custom bug/non-bug status code patterns from the settings file
#[derive(Debug, Default, Clone)]
pub struct BugCodeSettings {
    custom_bug_codes: Vec<Regex>,
    custom_non_bug_codes: Vec<Regex>,
}

impl BugCodeSettings {
    /// Compile pattern lists from the settings file.
    pub fn from_patterns(bug_codes: &[String], non_bug_codes: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|source| TransportError::InvalidPattern {
                        pattern: p.clone(),
                        source,
                    })
                })
                .collect()
        };
        Ok(Self {
            custom_bug_codes: compile(bug_codes)?,
            custom_non_bug_codes: compile(non_bug_codes)?,
        })
    }
}

/// A received (or synthesized) HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    raw: String,
    status_code: Option<String>,
    status_text: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl HttpResponse {
    /// Parse a raw HTTP/1.1 response string.
    ///
    /// The body is everything after the first blank line; the caller is
    /// responsible for having framed it correctly.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (head, body) = match raw.split_once(HEADER_DELIM) {
            Some((head, body)) => (head, Some(body.to_string())),
            None => (raw.as_str(), None),
        };

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or("");
        let mut status_parts = status_line.splitn(3, ' ');
        let _version = status_parts.next();
        let status_code = status_parts
            .next()
            .filter(|c| c.len() == 3 && c.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_string);
        let status_text = status_parts.next().map(str::to_string);

        let headers = lines
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self { raw, status_code, status_text, headers, body }
    }

    fn pseudo(code: &str) -> Self {
        Self {
            raw: String::new(),
            status_code: Some(code.to_string()),
            status_text: None,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Response for a request that hit the per-request timeout.
    pub fn timeout() -> Self {
        Self::pseudo(TIMEOUT_CODE)
    }

    /// Response for a connection closed while sending or receiving.
    pub fn connection_closed() -> Self {
        Self::pseudo(CONNECTION_CLOSED_CODE)
    }

    /// Placeholder for a request its sequence never reached.
    pub fn never_sent() -> Self {
        Self::pseudo(NEVER_SENT_CODE)
    }

    /// The entire response as received.
    pub fn to_raw(&self) -> &str {
        &self.raw
    }

    pub fn status_code(&self) -> Option<&str> {
        self.status_code.as_deref()
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_str(self.body()?.trim()).ok()
    }

    /// True for the never-sent/timeout/closed pseudo-codes.
    pub fn is_pseudo_code(&self) -> bool {
        matches!(
            self.status_code(),
            Some(TIMEOUT_CODE) | Some(CONNECTION_CLOSED_CODE) | Some(NEVER_SENT_CODE)
        )
    }

    /// True when the status code counts as a valid response.
    pub fn has_valid_code(&self) -> bool {
        self.status_code().is_some_and(|code| VALID_CODES.contains(&code))
    }

    /// True when the status code indicates a bug.
    ///
    /// With non-bug patterns configured, every code that fails to match one
    /// of them is a bug. Otherwise any 5xx (which includes the timeout and
    /// connection-closed pseudo-codes) or a code matching a bug pattern is a
    /// bug.
    pub fn has_bug_code(&self, settings: &BugCodeSettings) -> bool {
        let Some(code) = self.status_code() else {
            return false;
        };
        if !settings.custom_non_bug_codes.is_empty() {
            return !settings.custom_non_bug_codes.iter().any(|p| p.is_match(code));
        }
        if code.starts_with('5') {
            return true;
        }
        settings.custom_bug_codes.iter().any(|p| p.is_match(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nLocation: /a/1\r\n\r\n{\"id\": 1}";

    #[test]
    fn test_parse_status_line_headers_body() {
        let response = HttpResponse::from_raw(RAW);
        assert_eq!(response.status_code(), Some("201"));
        assert_eq!(response.status_text(), Some("Created"));
        assert_eq!(response.header("location"), Some("/a/1"));
        assert_eq!(response.body(), Some("{\"id\": 1}"));
        assert_eq!(response.json_body(), Some(serde_json::json!({"id": 1})));
    }

    #[test]
    fn test_garbage_has_no_status_code() {
        let response = HttpResponse::from_raw("not http at all");
        assert_eq!(response.status_code(), None);
        assert!(!response.has_valid_code());
        assert!(!response.has_bug_code(&BugCodeSettings::default()));
    }

    #[test]
    fn test_valid_code_set() {
        for code in ["200", "201", "202", "204", "304"] {
            let raw = format!("HTTP/1.1 {code} X\r\n\r\n");
            assert!(HttpResponse::from_raw(raw).has_valid_code(), "{code}");
        }
        assert!(!HttpResponse::from_raw("HTTP/1.1 404 Not Found\r\n\r\n").has_valid_code());
    }

    #[test]
    fn test_5xx_and_pseudo_codes_are_bugs() {
        let settings = BugCodeSettings::default();
        assert!(HttpResponse::from_raw("HTTP/1.1 500 Oops\r\n\r\n").has_bug_code(&settings));
        assert!(HttpResponse::timeout().has_bug_code(&settings));
        assert!(HttpResponse::connection_closed().has_bug_code(&settings));
        assert!(!HttpResponse::from_raw("HTTP/1.1 404 Nope\r\n\r\n").has_bug_code(&settings));
    }

    #[test]
    fn test_custom_bug_codes_extend_the_set() {
        let settings =
            BugCodeSettings::from_patterns(&["403".to_string()], &[]).expect("patterns");
        assert!(HttpResponse::from_raw("HTTP/1.1 403 Forbidden\r\n\r\n").has_bug_code(&settings));
        assert!(!HttpResponse::from_raw("HTTP/1.1 404 Nope\r\n\r\n").has_bug_code(&settings));
    }

    #[test]
    fn test_non_bug_codes_invert_the_rule() {
        let settings =
            BugCodeSettings::from_patterns(&[], &["2..".to_string(), "4..".to_string()])
                .expect("patterns");
        assert!(!HttpResponse::from_raw("HTTP/1.1 404 Nope\r\n\r\n").has_bug_code(&settings));
        assert!(HttpResponse::from_raw("HTTP/1.1 302 Found\r\n\r\n").has_bug_code(&settings));
    }

    #[test]
    fn test_classification_partitions_status_space() {
        let settings = BugCodeSettings::default();
        for code in ["200", "204", "304", "404", "500", "503"] {
            let response = HttpResponse::from_raw(format!("HTTP/1.1 {code} X\r\n\r\n"));
            let both = response.has_valid_code() && response.has_bug_code(&settings);
            assert!(!both, "{code} classified as both valid and bug");
        }
    }
}
