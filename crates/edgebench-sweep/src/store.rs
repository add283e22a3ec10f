// SPDX-License-Identifier: AGPL-3.0-only

//! Result stores
//!
//! A store receives one [`FinalResult`] per tier. [`JsonDirStore`] writes
//! each as a pretty-printed JSON file; [`MemoryStore`] keeps them for tests
//! and embedding callers.

use crate::error::StoreError;
use crate::results::FinalResult;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Destination of tier records
pub trait ResultStore: Debug + Send + Sync {
    /// Persist one tier record, returning the key it was stored under
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be serialized or written.
    fn persist(&self, result: FinalResult) -> Result<String, StoreError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// One JSON document per tier in a directory
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    /// Store writing into `dir` (created on first persist)
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ResultStore for JsonDirStore {
    fn persist(&self, result: FinalResult) -> Result<String, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let key = result.key();
        let path = self.dir.join(format!("{key}.json"));
        let json = serde_json::to_string_pretty(&result)?;
        fs::write(&path, json).map_err(|e| StoreError::io(&path, e))?;

        tracing::info!(
            "Stored {} model results for {} in {}",
            result.models.len(),
            key,
            path.display()
        );
        Ok(key)
    }

    fn describe(&self) -> String {
        format!("json:{}", self.dir.display())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    results: Mutex<Vec<FinalResult>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every stored record, in persist order
    pub fn results(&self) -> Vec<FinalResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether nothing was stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for MemoryStore {
    fn persist(&self, result: FinalResult) -> Result<String, StoreError> {
        let key = result.key();
        self.results
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .push(result);
        Ok(key)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
