// SPDX-License-Identifier: AGPL-3.0-only

//! Sweep configuration
//!
//! A [`SweepConfig`] is built once per run, validated, and then shared
//! read-only with the worker (`Arc<SweepConfig>`). Nothing mutates it while
//! a sweep is running.
//!
//! ```toml
//! models_dir = "models"
//! dataset_dir = "dataset"
//! labels_path = "labels.txt"
//! devices = ["cpu", "cpu-multi", "gpu", "nnapi"]
//! families = ["mobilenet_v1"]
//! batch_sizes = [1, 4, 8]
//! rounds = 3
//!
//! [samples]
//! default = 100
//! entries = [{ batch_size = 8, images = 400 }]
//!
//! [output]
//! csv_path = "results.csv"
//! results_dir = "results"
//! ```

use crate::error::ConfigError;
use edgebench_engine::Device;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of predictions kept per image
pub const DEFAULT_TOP_K: usize = 5;

/// Default marker of the canonical resolution variant
pub const DEFAULT_RESOLUTION_MARKER: &str = "224";

/// Images used for one batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCount {
    /// Batch size the entry applies to
    pub batch_size: usize,
    /// Images drawn per round
    pub images: usize,
}

/// Per-batch-size image sample counts
///
/// A batch size without an entry uses `default`; without a default the whole
/// image set is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleTable {
    /// Count for batch sizes without an entry
    pub default: Option<usize>,
    /// Explicit counts
    pub entries: Vec<SampleCount>,
}

impl SampleTable {
    /// Images to draw for `batch_size`, `None` meaning all of them
    pub fn count_for(&self, batch_size: usize) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.batch_size == batch_size)
            .map(|e| e.images)
            .or(self.default)
    }
}

/// Where results go
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// CSV file, truncated at sweep start
    pub csv_path: Option<PathBuf>,
    /// Directory receiving one JSON document per tier
    pub results_dir: Option<PathBuf>,
}

/// Immutable configuration of one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Root of `<family>/<model>` files
    pub models_dir: PathBuf,
    /// Root of sample images
    pub dataset_dir: PathBuf,
    /// Label file, one label per output index
    pub labels_path: PathBuf,
    /// Devices in sweep order
    pub devices: Vec<Device>,
    /// Families in sweep order; empty means every family in `models_dir`
    pub families: Vec<String>,
    /// Batch sizes in sweep order
    pub batch_sizes: Vec<usize>,
    /// Rounds per tier
    pub rounds: usize,
    /// Predictions recorded per image at batch size 1
    pub top_k: usize,
    /// Only names containing this run at batch sizes above 1
    pub resolution_marker: String,
    /// Images per round, by batch size
    pub samples: SampleTable,
    /// Seed of the per-round image shuffle
    pub seed: u64,
    /// Per-inference timeout
    pub inference_timeout_ms: Option<u64>,
    /// Result destinations
    pub output: OutputConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            dataset_dir: PathBuf::from("dataset"),
            labels_path: PathBuf::from("labels.txt"),
            devices: vec![Device::Cpu, Device::CpuMulti, Device::Gpu, Device::Nnapi],
            families: Vec::new(),
            batch_sizes: vec![1],
            rounds: 1,
            top_k: DEFAULT_TOP_K,
            resolution_marker: DEFAULT_RESOLUTION_MARKER.to_string(),
            samples: SampleTable::default(),
            seed: 0,
            inference_timeout_ms: Some(60_000),
            output: OutputConfig {
                csv_path: Some(PathBuf::from("results.csv")),
                results_dir: None,
            },
        }
    }
}

impl SweepConfig {
    /// Parse from TOML text; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded sweep config from {}", path.display());
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations that cannot produce a meaningful sweep
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("devices cannot be empty".into()));
        }
        if self.batch_sizes.is_empty() {
            return Err(ConfigError::Invalid("batch_sizes cannot be empty".into()));
        }
        if self.batch_sizes.contains(&0) {
            return Err(ConfigError::Invalid("batch sizes must be at least 1".into()));
        }
        if self.rounds == 0 {
            return Err(ConfigError::Invalid("rounds must be at least 1".into()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".into()));
        }
        if self.resolution_marker.is_empty() {
            return Err(ConfigError::Invalid("resolution_marker cannot be empty".into()));
        }
        if self.inference_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("inference_timeout_ms must be positive".into()));
        }
        if let Some(entry) = self.samples.entries.iter().find(|e| e.images < e.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "samples for batch size {} ({} images) cannot fill one batch",
                entry.batch_size, entry.images
            )));
        }
        Ok(())
    }

    /// Timeout as a [`Duration`]
    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }
}
