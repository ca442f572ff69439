//! JSONL-backed status store.
//!
//! All projects share one `loop_status.jsonl` file, one record per line. Every
//! `speclooper run` is its own process, so the file is never trusted from
//! memory: reads parse the current file, and a save re-reads it under an
//! exclusive lock on `loop_status.lock`, replaces one record and swaps the
//! file in via a temp file and rename. Readers therefore see either the old or
//! the new file and never wait on a writer.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use super::traits::StatusStore;
use crate::domain::{LoopStatus, ProjectId};
use crate::error::{LoopError, Result};

const STATUS_FILE: &str = "loop_status.jsonl";
const LOCK_FILE: &str = "loop_status.lock";

/// JSONL status store shared by every process using the same directory.
pub struct JsonlStatusStore {
    base_path: PathBuf,
    // Serializes saves within this process; the file lock covers the rest.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for JsonlStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStatusStore")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl JsonlStatusStore {
    /// Create a new store rooted at the given directory.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing JSONL file.
    pub fn file_path(&self) -> PathBuf {
        self.base_path.join(STATUS_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.base_path.join(LOCK_FILE)
    }

    /// Parse the file as it is on disk now.
    fn read_records(&self) -> Result<BTreeMap<ProjectId, LoopStatus>> {
        let path = self.file_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = BTreeMap::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LoopStatus>(&line) {
                // Later lines win, so a hand-appended record overrides.
                Ok(status) => {
                    records.insert(status.project_id.clone(), status);
                }
                Err(e) => {
                    log::warn!("Skipping malformed status line {} in {}: {}", lineno + 1, path.display(), e);
                }
            }
        }
        Ok(records)
    }

    /// Rewrite the whole file from a snapshot.
    fn rewrite_file(&self, records: &BTreeMap<ProjectId, LoopStatus>) -> Result<()> {
        let path = self.file_path();
        let tmp = path.with_extension(format!("jsonl.{}.tmp", std::process::id()));
        {
            let mut file = File::create(&tmp)?;
            for record in records.values() {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StatusStore for JsonlStatusStore {
    fn load(&self, project: &ProjectId) -> Result<LoopStatus> {
        let status = self
            .read_records()?
            .remove(project)
            .unwrap_or_else(|| LoopStatus::idle(project.clone()));
        Ok(status)
    }

    fn save(&self, status: &LoopStatus) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|e| LoopError::Storage(e.to_string()))?;
        // Released when the handle closes at the end of this call.
        let lock_file = File::create(self.lock_path())?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| LoopError::Storage(format!("Failed to acquire status lock: {}", e)))?;

        // Re-read under the lock so records other processes saved survive.
        let mut records = self.read_records()?;
        records.insert(status.project_id.clone(), status.clone());
        self.rewrite_file(&records)
    }

    fn list(&self) -> Result<Vec<LoopStatus>> {
        Ok(self.read_records()?.into_values().collect())
    }
}
