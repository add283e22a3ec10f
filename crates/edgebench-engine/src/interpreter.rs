// SPDX-License-Identifier: AGPL-3.0-only

//! Interpreter lifecycle
//!
//! [`InterpreterManager::load`] builds one [`InterpreterHandle`] per
//! (device, model) pairing. The handle owns a dedicated engine thread that
//! holds the interpreter; forward passes are sent to it over a channel and
//! timed on that thread. A handle is never rebuilt in place: a device or
//! model change means dropping it and loading a new one.

use crate::backend::{select_backend, Device, EngineOptions};
use crate::engine::{Interpreter, InterpreterFactory, TensorSpec};
use crate::error::{EngineError, Result};
use crate::mmap::MappedModel;
use bytes::Bytes;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Output of one forward pass, timed on the engine thread
#[derive(Debug, Clone)]
pub struct TimedOutput {
    /// Wall-clock time of the engine call only
    pub duration: Duration,
    /// Raw output tensor bytes
    pub output: Bytes,
}

struct Job {
    input: Vec<u8>,
    reply: Sender<Result<TimedOutput>>,
}

/// Builds interpreter handles for (device, model) pairs
#[derive(Debug, Clone)]
pub struct InterpreterManager {
    factory: Arc<dyn InterpreterFactory>,
}

impl InterpreterManager {
    /// Create a manager around an engine factory
    pub fn new(factory: Arc<dyn InterpreterFactory>) -> Self {
        Self { factory }
    }

    /// Engine name
    pub fn engine_name(&self) -> &str {
        self.factory.name()
    }

    /// Load a model for a device.
    ///
    /// Selects a fresh backend, maps the model, builds the interpreter and,
    /// for `batch_size > 1`, resizes the input batch dimension before the
    /// tensor specs are read.
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be mapped or parsed, a delegate
    /// cannot be attached, or the resize fails.
    pub fn load(
        &self,
        device: Device,
        model_path: &Path,
        batch_size: usize,
    ) -> Result<InterpreterHandle> {
        let backend = select_backend(device);
        let options = backend.configure(EngineOptions::default());

        let model = Arc::new(MappedModel::open(model_path)?);
        let model_name = model.file_name();

        tracing::info!(
            "Loading {model_name} on {device} (batch {batch_size}, engine {})",
            self.factory.name()
        );

        let mut interpreter = self.factory.build(Arc::clone(&model), &options)?;
        if batch_size > 1 {
            interpreter.resize_input(batch_size)?;
        }

        InterpreterHandle::spawn(model_name, device, batch_size, options, model, interpreter)
    }
}

/// Exclusive owner of one interpreter for one (device, model) pairing
pub struct InterpreterHandle {
    model_name: String,
    device: Device,
    batch_size: usize,
    options: EngineOptions,
    input: TensorSpec,
    output: TensorSpec,
    model: Arc<MappedModel>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    poisoned: bool,
}

impl std::fmt::Debug for InterpreterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterHandle")
            .field("model_name", &self.model_name)
            .field("device", &self.device)
            .field("batch_size", &self.batch_size)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl InterpreterHandle {
    fn spawn(
        model_name: String,
        device: Device,
        batch_size: usize,
        options: EngineOptions,
        model: Arc<MappedModel>,
        interpreter: Box<dyn Interpreter>,
    ) -> Result<Self> {
        let input = interpreter.input_spec().clone();
        let output = interpreter.output_spec().clone();

        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(format!("engine-{device}"))
            .spawn(move || engine_loop(interpreter, &rx))?;

        tracing::debug!("Interpreter ready: input {:?}, output {:?}", input.shape, output.shape);

        Ok(Self {
            model_name,
            device,
            batch_size,
            options,
            input,
            output,
            model,
            jobs: Some(tx),
            worker: Some(worker),
            poisoned: false,
        })
    }

    /// Model file name
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Device the interpreter was built for
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Batch size the input was resized to
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Options the interpreter was built with
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Input tensor spec (after batch resize)
    pub const fn input_spec(&self) -> &TensorSpec {
        &self.input
    }

    /// Output tensor spec (after batch resize)
    pub const fn output_spec(&self) -> &TensorSpec {
        &self.output
    }

    /// Input image height (`shape[1]`)
    pub fn image_height(&self) -> usize {
        self.input.shape.get(1).copied().unwrap_or(1)
    }

    /// Input image width (`shape[2]`)
    pub fn image_width(&self) -> usize {
        self.input.shape.get(2).copied().unwrap_or(1)
    }

    /// Output classes per image (last output dimension)
    pub fn class_count(&self) -> usize {
        self.output.shape.last().copied().unwrap_or(0)
    }

    /// Size of the mapped model in bytes
    pub fn model_size(&self) -> usize {
        self.model.len()
    }

    /// Whether a previous call timed out and the engine thread was abandoned
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Submit one forward pass and wait for it.
    ///
    /// With a timeout, a pass that does not answer in time poisons the
    /// handle: the engine thread is detached and every later call fails.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, [`EngineError::Timeout`], or
    /// [`EngineError::Unavailable`] once the handle is poisoned.
    pub fn invoke(&mut self, input: Vec<u8>, timeout: Option<Duration>) -> Result<TimedOutput> {
        if self.poisoned {
            return Err(EngineError::unavailable(format!(
                "{} timed out earlier",
                self.model_name
            )));
        }
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| EngineError::unavailable("engine thread stopped"))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        jobs.send(Job {
            input,
            reply: reply_tx,
        })
        .map_err(|_| EngineError::unavailable("engine thread exited"))?;

        match timeout {
            None => reply_rx
                .recv()
                .map_err(|_| EngineError::unavailable("engine thread exited mid-call"))?,
            Some(limit) => match reply_rx.recv_timeout(limit) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    self.poison();
                    #[allow(clippy::cast_possible_truncation)]
                    Err(EngineError::Timeout {
                        duration_ms: limit.as_millis() as u64,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    Err(EngineError::unavailable("engine thread exited mid-call"))
                }
            },
        }
    }

    fn poison(&mut self) {
        tracing::warn!(
            "{} on {} exceeded its timeout; abandoning engine thread",
            self.model_name,
            self.device
        );
        self.poisoned = true;
        self.jobs = None;
        // Detach: a stuck engine call cannot be interrupted
        self.worker = None;
    }
}

impl Drop for InterpreterHandle {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Engine thread for {} panicked", self.model_name);
            }
        }
        tracing::debug!("Released interpreter for {} on {}", self.model_name, self.device);
    }
}

fn engine_loop(mut interpreter: Box<dyn Interpreter>, jobs: &Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let start = Instant::now();
        let result = interpreter.invoke(&job.input);
        let duration = start.elapsed();

        let reply = result.map(|output| TimedOutput {
            duration,
            output: Bytes::from(output),
        });
        // Caller may have given up after a timeout
        let _ = job.reply.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::reference::{ReferenceEngine, ReferenceModelSpec};
    use std::io::Write;

    fn model_file(spec: &ReferenceModelSpec) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&spec.pack()).unwrap();
        file
    }

    #[test]
    fn test_load_reads_shapes() {
        let file = model_file(&ReferenceModelSpec::new(12, 10, 7, false));
        let manager = InterpreterManager::new(Arc::new(ReferenceEngine::new()));

        let handle = manager.load(Device::Cpu, file.path(), 1).unwrap();
        assert_eq!(handle.image_height(), 12);
        assert_eq!(handle.image_width(), 10);
        assert_eq!(handle.class_count(), 7);
        assert_eq!(handle.options().num_threads, 1);
    }

    #[test]
    fn test_batch_resize_scales_both_tensors() {
        let file = model_file(&ReferenceModelSpec::new(8, 8, 5, true));
        let manager = InterpreterManager::new(Arc::new(ReferenceEngine::new()));

        let handle = manager.load(Device::CpuMulti, file.path(), 4).unwrap();
        assert_eq!(handle.input_spec().shape, vec![4, 8, 8, 3]);
        assert_eq!(handle.output_spec().shape, vec![4, 5]);
        assert_eq!(handle.options().num_threads, 4);
    }

    #[test]
    fn test_invoke_times_forward_pass() {
        let file = model_file(&ReferenceModelSpec::new(4, 4, 3, false));
        let manager = InterpreterManager::new(Arc::new(ReferenceEngine::new()));
        let mut handle = manager.load(Device::Nnapi, file.path(), 1).unwrap();

        let input = vec![0u8; handle.input_spec().size_bytes()];
        let out = handle.invoke(input, None).unwrap();
        assert_eq!(out.output.len(), handle.output_spec().size_bytes());
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let manager = InterpreterManager::new(Arc::new(ReferenceEngine::new()));
        let err = manager
            .load(Device::Cpu, Path::new("/nonexistent/m.tflite"), 1)
            .unwrap_err();
        assert!(err.is_load_error());
    }
}
