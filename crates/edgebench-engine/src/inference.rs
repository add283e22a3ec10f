// SPDX-License-Identifier: AGPL-3.0-only

//! Timed inference execution
//!
//! The reported latency is the engine call alone: the timer starts right
//! before the forward pass and stops right after, on the engine thread.
//! Input preparation happens before [`InferenceExecutor::run`] and is not
//! counted.

use crate::error::{EngineError, Result};
use crate::interpreter::InterpreterHandle;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Executor configuration
#[derive(Debug, Clone, Default)]
pub struct InferenceConfig {
    /// Per-inference timeout; `None` waits forever
    pub timeout: Option<Duration>,
}

impl InferenceConfig {
    /// Configuration with a timeout in milliseconds
    pub const fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout: Some(Duration::from_millis(timeout_ms)),
        }
    }
}

/// Runs batches through an interpreter handle
#[derive(Debug, Clone, Default)]
pub struct InferenceExecutor {
    config: InferenceConfig,
}

impl InferenceExecutor {
    /// Create executor with configuration
    pub const fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    /// Execute one forward pass over a prepared batch buffer
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Input size doesn't match the handle's input tensor
    /// - The engine fails
    /// - The pass exceeds the configured timeout
    pub fn run(&self, handle: &mut InterpreterHandle, batch: Vec<u8>) -> Result<InferenceResult> {
        let expected = handle.input_spec().size_bytes();
        if batch.len() != expected {
            return Err(EngineError::ShapeMismatch {
                expected,
                actual: batch.len(),
            });
        }

        let input_bytes = batch.len();
        let timed = handle.invoke(batch, self.config.timeout)?;

        debug!(
            "{} on {}: {:?} ({} → {} bytes)",
            handle.model_name(),
            handle.device(),
            timed.duration,
            input_bytes,
            timed.output.len()
        );

        Ok(InferenceResult {
            output_bytes: timed.output.len(),
            output: timed.output,
            duration: timed.duration,
            input_bytes,
            batch_size: handle.batch_size().max(1),
        })
    }

    /// Get executor configuration
    pub const fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

/// Inference result with metrics
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Output tensor bytes
    pub output: Bytes,

    /// Engine call duration
    pub duration: Duration,

    /// Input bytes submitted
    pub input_bytes: usize,

    /// Output bytes returned
    pub output_bytes: usize,

    /// Images in the batch
    pub batch_size: usize,
}

impl InferenceResult {
    /// Images per second for this call
    pub fn throughput_ips(&self) -> f64 {
        if self.duration.as_secs_f64() == 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let images = self.batch_size as f64;
        images / self.duration.as_secs_f64()
    }

    /// Latency in microseconds
    pub fn latency_us(&self) -> f64 {
        self.duration.as_secs_f64() * 1_000_000.0
    }
}
