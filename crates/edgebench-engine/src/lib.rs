// SPDX-License-Identifier: AGPL-3.0-only

//! Inference engine plumbing for edgebench.
//!
//! This crate owns everything between "benchmark this model on that device"
//! and "here is the timed output buffer".
//!
//! # Layers
//!
//! ```text
//! Device ──select_backend──▶ Backend::configure ──▶ EngineOptions
//!                                                      │
//! MappedModel ──InterpreterFactory::build──────────────┘──▶ Interpreter
//!                                                      │
//! InterpreterManager::load ──▶ InterpreterHandle (engine thread)
//!                                                      │
//! InferenceExecutor::run ──▶ InferenceResult { duration, output }
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use edgebench_engine::{Device, InferenceExecutor, InterpreterManager, ReferenceEngine};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = InterpreterManager::new(Arc::new(ReferenceEngine::new()));
//! let model = std::path::Path::new("models/mobilenet_v1/m_224.tflite");
//! let mut handle = manager.load(Device::CpuMulti, model, 1)?;
//!
//! let input = vec![0u8; handle.input_spec().size_bytes()];
//! let result = InferenceExecutor::default().run(&mut handle, input)?;
//! println!("{:.0} µs", result.latency_us());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod engine;
mod error;
mod inference;
mod interpreter;
mod mmap;

pub use backend::{
    select_backend, Backend, CpuBackend, CpuMultiThreadBackend, Delegate, DelegateBackend,
    Device, EngineOptions, MULTI_THREAD_COUNT,
};
pub use backends::{ReferenceEngine, ReferenceModelSpec};
pub use engine::{ElementType, Interpreter, InterpreterFactory, TensorSpec};
pub use error::{EngineError, Result};
pub use inference::{InferenceConfig, InferenceExecutor, InferenceResult};
pub use interpreter::{InterpreterHandle, InterpreterManager, TimedOutput};
pub use mmap::MappedModel;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Device, EngineError, EngineOptions, InferenceConfig, InferenceExecutor,
        InterpreterFactory, InterpreterHandle, InterpreterManager, ReferenceEngine, Result,
    };
}
