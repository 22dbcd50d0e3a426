//! Plaintext network log
//!
//! Append-only per-worker record of every request sent and response
//! received, with auth material redacted before anything touches disk.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::Result;

static AUTH_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^(authorization:[ \t]*)[^\r\n]+").expect("static pattern compiles")
});

/// Replace auth header values with a fixed placeholder.
pub fn redact_tokens(text: &str) -> String {
    AUTH_HEADER.replace_all(text, "${1}_OMITTED_AUTH_TOKEN_").into_owned()
}

/// One worker's append-only network log
pub struct NetworkLog {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl NetworkLog {
    /// Open (or create) the log file for a worker.
    pub fn create(dir: &Path, worker_id: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("network.testing.{worker_id}.txt"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(BufWriter::new(file)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entry(&self, direction: &str, payload: &str) {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut file = self.file.lock();
        let entry = format!("{timestamp}: {direction}: {:?}\n", redact_tokens(payload));
        if let Err(e) = file.write_all(entry.as_bytes()).and_then(|()| file.flush()) {
            tracing::warn!(error = %e, "network log write failed");
        }
    }

    /// Record a rendered request as sent.
    pub fn log_request(&self, payload: &str) {
        self.write_entry("Sending", payload);
    }

    /// Record a received response.
    pub fn log_response(&self, raw: &str) {
        self.write_entry("Received", raw);
    }

    /// Record a free-form marker line (generation advance, checker start).
    pub fn log_marker(&self, marker: &str) {
        self.write_entry("Marker", marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_authorization_values() {
        let payload = "GET / HTTP/1.1\r\nAuthorization: Bearer secret-token\r\nHost: x\r\n\r\n";
        let redacted = redact_tokens(payload);
        assert!(!redacted.contains("secret-token"));
        assert!(redacted.contains("Authorization: _OMITTED_AUTH_TOKEN_"));
        assert!(redacted.contains("Host: x"));
    }

    #[test]
    fn test_log_appends_and_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let log = NetworkLog::create(dir.path(), 0).expect("log");
            log.log_request("GET /a HTTP/1.1\r\n\r\n");
        }
        {
            let log = NetworkLog::create(dir.path(), 0).expect("log");
            log.log_response("HTTP/1.1 200 OK\r\n\r\n");
        }
        let content =
            std::fs::read_to_string(dir.path().join("network.testing.0.txt")).expect("read");
        assert!(content.contains("Sending"));
        assert!(content.contains("Received"));
    }
}
