//! Replay artifacts
//!
//! Each bug bucket gets one replay file holding the exact payloads to
//! re-send, preceded by comment lines describing the finding. A JSON index
//! in the same directory maps bucket keys to their files and metadata.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network_log::redact_tokens;

/// One request to replay, with the response observed at discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Index metadata for a single bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketIndexEntry {
    pub origin: String,
    pub bug_hash: String,
    pub status_code: String,
    pub reproducible: bool,
    pub replay_file: String,
}

/// Writes per-bucket replay files and maintains the bucket index
pub struct ReplayWriter {
    dir: PathBuf,
    index: Mutex<BTreeMap<String, BucketIndexEntry>>,
}

impl ReplayWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf(), index: Mutex::new(BTreeMap::new()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one bucket's replay file and update the index on disk.
    pub fn write_bucket(
        &self,
        entry: BucketIndexEntry,
        header_lines: &[String],
        payloads: &[ReplayEntry],
    ) -> Result<PathBuf> {
        let file_name = format!("{}.replay.txt", entry.bug_hash);
        let path = self.dir.join(&file_name);
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;

        for line in header_lines {
            writeln!(file, "# {line}")?;
        }
        writeln!(file)?;
        for replay in payloads {
            writeln!(file, "-> {:?}", redact_tokens(&replay.payload))?;
            if let Some(response) = &replay.response {
                writeln!(file, "<- {:?}", response)?;
            }
            writeln!(file)?;
        }

        let mut index = self.index.lock();
        index.insert(
            entry.bug_hash.clone(),
            BucketIndexEntry { replay_file: file_name, ..entry },
        );
        let index_path = self.dir.join("bug_buckets.json");
        let serialized = serde_json::to_string_pretty(&*index)?;
        std::fs::write(index_path, serialized)?;

        Ok(path)
    }
}
