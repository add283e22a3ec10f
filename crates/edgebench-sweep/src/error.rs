// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for sweeps, configuration, input preparation and result output

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Errors raised while driving a sweep
#[derive(Debug, Error)]
pub enum SweepError {
    /// A sweep is already running on this runner
    #[error("A sweep is already running")]
    AlreadyRunning,

    /// Invalid or unreadable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Models, labels or images could not be listed
    #[error("Asset listing failed: {0}")]
    AssetList(#[from] edgebench_models::ModelError),

    /// Model could not be mapped, parsed or attached to its delegate
    #[error("Failed to load {model}: {source}")]
    ModelLoad {
        /// Model file name
        model: String,
        /// Engine error
        #[source]
        source: edgebench_engine::EngineError,
    },

    /// Forward pass failed or timed out
    #[error("Inference failed for {model}: {reason}")]
    Inference {
        /// Model file name
        model: String,
        /// Reason for failure
        reason: String,
    },

    /// Input image could not be prepared
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    /// CSV or result store write failed
    #[error(transparent)]
    Output(#[from] StoreError),

    /// Worker thread could not be started
    #[error("Cannot start sweep worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Worker thread panicked
    #[error("Sweep worker panicked")]
    WorkerPanicked,
}

impl SweepError {
    /// Create a model load error
    pub fn model_load(model: impl Into<String>, source: edgebench_engine::EngineError) -> Self {
        Self::ModelLoad {
            model: model.into(),
            source,
        }
    }

    /// Create an inference error
    pub fn inference(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Inference {
            model: model.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Cannot access config {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML could not be produced
    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values are out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Input preparation errors
#[derive(Debug, Error)]
pub enum PrepareError {
    /// Image file could not be opened or decoded
    #[error("Cannot decode {path}: {reason}")]
    Decode {
        /// Image path
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Tensor types within one batch differ
    #[error("Cannot mix u8 and f32 tensors in one batch")]
    MixedTypes,
}

/// Result output errors (CSV file or result store)
#[derive(Debug, Error)]
pub enum StoreError {
    /// File could not be created or written
    #[error("Cannot write {path}: {source}")]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Result document could not be serialized
    #[error("Cannot serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Store cannot accept results
    #[error("Result store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create an I/O error for `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
