// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for engine operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while building interpreters or running inference
#[derive(Debug, Error)]
pub enum EngineError {
    /// Model file does not exist
    #[error("Model file not found: {path}")]
    ModelNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Model bytes could not be parsed by the engine
    #[error("Invalid model: {reason}")]
    InvalidModel {
        /// Reason for failure
        reason: String,
    },

    /// A backend delegate could not be attached at build time
    #[error("Delegate {delegate} unavailable: {reason}")]
    DelegateUnavailable {
        /// Delegate name
        delegate: String,
        /// Reason for failure
        reason: String,
    },

    /// Input buffer does not match the interpreter's input tensor
    #[error("Input size mismatch: got {actual} bytes, expected {expected}")]
    ShapeMismatch {
        /// Expected byte count
        expected: usize,
        /// Received byte count
        actual: usize,
    },

    /// I/O error while reading or mapping a model
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Forward pass failed inside the engine
    #[error("Execution failed: {reason}")]
    ExecutionFailed {
        /// Reason for failure
        reason: String,
    },

    /// Forward pass did not finish in time
    #[error("Inference timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Interpreter handle can no longer accept work
    #[error("Interpreter unavailable: {reason}")]
    Unavailable {
        /// Reason the handle is unusable
        reason: String,
    },
}

impl EngineError {
    /// Create a model not found error
    pub fn model_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ModelNotFound { path: path.into() }
    }

    /// Create an invalid model error
    pub fn invalid_model(reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            reason: reason.into(),
        }
    }

    /// Create a delegate unavailable error
    pub fn delegate_unavailable(delegate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DelegateUnavailable {
            delegate: delegate.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution failure
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    /// Create an unavailable-handle error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether the error happened while building the interpreter
    /// (as opposed to during a forward pass).
    pub const fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound { .. }
                | Self::InvalidModel { .. }
                | Self::DelegateUnavailable { .. }
                | Self::Io { .. }
        )
    }
}
