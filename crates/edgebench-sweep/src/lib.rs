// SPDX-License-Identifier: AGPL-3.0-only

#![deny(unsafe_code)]

//! Benchmark sweeps for edgebench
//!
//! A sweep measures every model of every configured family on every
//! configured device, at every batch size, for a number of rounds:
//!
//! ```text
//! SweepConfig ──▶ SweepController ──▶ InterpreterManager::load   (per device × model)
//!                      │           ──▶ preprocess::prepare_batch (per batch)
//!                      │           ──▶ InferenceExecutor::run    (per batch)
//!                      │           ──▶ ResultAggregator          (CSV, log, store)
//!                      ▼
//!                 UiEvent channel ──▶ UiBridge (LogView, console, ...)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use edgebench_engine::ReferenceEngine;
//! use edgebench_sweep::{events, EventSender, LogView, SweepConfig, SweepController, SweepRunner};
//! use std::sync::{mpsc, Arc};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(SweepConfig::from_file("sweep.toml")?);
//! let (tx, rx) = mpsc::channel();
//! let controller = SweepController::new(config, Arc::new(ReferenceEngine::new()))
//!     .with_events(EventSender::new(tx));
//!
//! let mut view = LogView::new();
//! view.begin_sweep();
//! let handle = SweepRunner::new().start(controller)?;
//! events::pump(&rx, &mut view);
//! let summary = handle.wait()?;
//! println!("{} batches in {:?}", summary.batches_executed, summary.elapsed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod aggregate;
pub mod config;
mod controller;
pub mod csv;
mod error;
pub mod events;
pub mod preprocess;
pub mod results;
pub mod store;
mod worker;

pub use aggregate::ResultAggregator;
pub use config::{OutputConfig, SampleCount, SampleTable, SweepConfig};
pub use controller::{skip_reason, SkipReason, SweepController, SweepSummary};
pub use csv::{CsvRow, CsvSink};
pub use error::{ConfigError, PrepareError, Result, StoreError, SweepError};
pub use events::{EventSender, LogView, UiBridge, UiEvent};
pub use preprocess::{prepare, prepare_batch, BatchBuffer, Tensor};
pub use results::{FinalResult, ModelResult, ModelStats, Prediction, SingleInferenceResult};
pub use store::{JsonDirStore, MemoryStore, ResultStore};
pub use worker::{start, CancelToken, RunnerState, SweepHandle, SweepRunner};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        CancelToken, EventSender, LogView, Result, SweepConfig, SweepController, SweepRunner,
        SweepSummary, UiBridge, UiEvent,
    };
}
