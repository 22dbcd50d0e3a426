//! Newline-delimited JSON trace database
//!
//! Every request/response exchange is appended as one JSON object carrying
//! timestamps, the raw payloads, parsed JSON bodies when available, and
//! correlation tags. Files rotate once they exceed 100 MiB.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network_log::redact_tokens;

const MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Correlation tags attached to each trace record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceTags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combination_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// One request/response exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub sent_timestamp: String,
    pub received_timestamp: String,
    pub request: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_json: Option<serde_json::Value>,
    pub tags: TraceTags,
}

impl TraceRecord {
    /// Build a record from raw payloads, redacting tokens and attaching
    /// parsed JSON bodies when the payloads carry any.
    pub fn new(
        sent_timestamp: chrono::DateTime<chrono::Utc>,
        received_timestamp: chrono::DateTime<chrono::Utc>,
        request: &str,
        response: &str,
        tags: TraceTags,
    ) -> Self {
        Self {
            sent_timestamp: sent_timestamp.to_rfc3339(),
            received_timestamp: received_timestamp.to_rfc3339(),
            request: redact_tokens(request),
            response: response.to_string(),
            request_json: extract_json_body(request),
            response_json: extract_json_body(response),
            tags,
        }
    }
}

fn extract_json_body(payload: &str) -> Option<serde_json::Value> {
    let (_, body) = payload.split_once("\r\n\r\n")?;
    serde_json::from_str(body.trim()).ok()
}

struct DbState {
    writer: BufWriter<File>,
    bytes_written: u64,
    file_index: u32,
}

/// Rotating ndjson sink
pub struct TraceDb {
    path: PathBuf,
    max_bytes: u64,
    state: Mutex<DbState>,
}

impl TraceDb {
    /// Open the trace DB at `path`; rotated files get a numeric suffix.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let bytes_written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes: MAX_FILE_BYTES,
            state: Mutex::new(DbState {
                writer: BufWriter::new(file),
                bytes_written,
                file_index: 0,
            }),
        })
    }

    /// Lower the rotation threshold (tests).
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Append one record, rotating first when the file is over budget.
    pub fn push(&self, record: &TraceRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut state = self.state.lock();
        if state.bytes_written + line.len() as u64 + 1 > self.max_bytes {
            state.file_index += 1;
            let rotated = self.path.with_extension(format!("{}.ndjson", state.file_index));
            let file = OpenOptions::new().create(true).append(true).open(&rotated)?;
            state.writer = BufWriter::new(file);
            state.bytes_written = 0;
        }
        state.writer.write_all(line.as_bytes())?;
        state.writer.write_all(b"\n")?;
        state.writer.flush()?;
        state.bytes_written += line.len() as u64 + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(i: usize) -> TraceRecord {
        TraceRecord::new(
            Utc::now(),
            Utc::now(),
            &format!("GET /a/{i} HTTP/1.1\r\n\r\n"),
            "HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\n{\"id\": 1}",
            TraceTags { combination_id: Some(i as u64), ..Default::default() },
        )
    }

    #[test]
    fn test_records_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.ndjson");
        let db = TraceDb::open(&path).expect("open");
        db.push(&record(1)).expect("push");
        db.push(&record(2)).expect("push");

        let content = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).expect("valid json");
            assert!(value["sent_timestamp"].is_string());
            assert_eq!(value["response_json"]["id"], 1);
        }
    }

    #[test]
    fn test_rotation_switches_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.ndjson");
        let db = TraceDb::open(&path).expect("open").with_max_bytes(256);
        for i in 0..8 {
            db.push(&record(i)).expect("push");
        }
        assert!(path.with_extension("1.ndjson").exists());
    }
}
