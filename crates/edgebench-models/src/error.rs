// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for catalog and data set operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for model and data set operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while listing or reading benchmark assets
#[derive(Debug, Error)]
pub enum ModelError {
    /// Directory could not be listed
    #[error("Cannot list {path}: {reason}")]
    ListFailed {
        /// Directory that was listed
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Label file missing or unreadable
    #[error("Label file not found: {path}")]
    LabelsNotFound {
        /// Path that was attempted
        path: PathBuf,
    },

    /// Label file has no labels
    #[error("Label file {path} contains no labels")]
    LabelsEmpty {
        /// Path of the empty file
        path: PathBuf,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl ModelError {
    /// Create a listing error
    pub fn list_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ListFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
