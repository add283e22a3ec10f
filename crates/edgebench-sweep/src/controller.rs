// SPDX-License-Identifier: AGPL-3.0-only

//! Sweep controller
//!
//! Drives every combination in a fixed nesting order:
//!
//! ```text
//! Device → ModelFamily → BatchSize → Round → Model → ImageBatch
//! ```
//!
//! One (device, family, batch size) combination is a *tier*; its results
//! are persisted together once all rounds and models are done. Every
//! (device, model) pairing gets a freshly loaded interpreter.
//!
//! Failures are contained at the smallest scope that makes sense:
//!
//! | failure | effect |
//! |---------|--------|
//! | model load | model skipped |
//! | inference (incl. timeout) | failure row, next model |
//! | image decode | failure row, next batch |
//! | family or data set listing | that device/family aborted |
//! | CSV or store write | logged, sweep continues |

use crate::aggregate::ResultAggregator;
use crate::config::SweepConfig;
use crate::csv::CsvSink;
use crate::error::SweepError;
use crate::events::EventSender;
use crate::preprocess::{load_image, prepare_batch};
use crate::results::{dequantize, FinalResult, ModelResult};
use crate::store::{JsonDirStore, ResultStore};
use crate::worker::CancelToken;
use edgebench_engine::{
    Device, InferenceConfig, InferenceExecutor, InterpreterFactory, InterpreterHandle,
    InterpreterManager,
};
use edgebench_models::{ImageSample, ImageSet, Labels, ModelCatalog, ModelDescriptor};
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a combination is not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The GPU delegate has no quantized kernels
    GpuQuantized,
    /// Edge-accelerator models are compiled for batch size 1
    EdgeAcceleratorBatched,
    /// Only the canonical resolution variant runs batched
    NonCanonicalResolution,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GpuQuantized => "GPU does not support quantized models",
            Self::EdgeAcceleratorBatched => "edge accelerator models run at batch size 1 only",
            Self::NonCanonicalResolution => "only the canonical resolution runs batched",
        })
    }
}

/// Skip rules, checked before any work is done for a combination
pub fn skip_reason(
    device: Device,
    model: &ModelDescriptor,
    batch_size: usize,
    resolution_marker: &str,
) -> Option<SkipReason> {
    if device == Device::Gpu && model.is_quantized() {
        return Some(SkipReason::GpuQuantized);
    }
    if model.is_edge_accelerator() && batch_size > 1 {
        return Some(SkipReason::EdgeAcceleratorBatched);
    }
    if batch_size != 1 && !model.matches_resolution(resolution_marker) {
        return Some(SkipReason::NonCanonicalResolution);
    }
    None
}

/// Counters of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Tier records handed to the store
    pub tiers_persisted: usize,
    /// (round, model) pairings that loaded and ran
    pub models_run: usize,
    /// (round, model) pairings skipped by a rule
    pub models_skipped: usize,
    /// Models that failed to load
    pub load_failures: usize,
    /// Batches executed successfully
    pub batches_executed: usize,
    /// Inference failures, timeouts included
    pub inference_failures: usize,
    /// Batches whose images could not be prepared
    pub prepare_failures: usize,
    /// Device/family combinations aborted by a listing error
    pub aborted_combinations: usize,
    /// CSV or store writes that failed
    pub output_errors: usize,
    /// Rows written to the CSV stream
    pub csv_rows: usize,
    /// The sweep stopped early on request
    pub cancelled: bool,
    /// Wall-clock duration of the sweep
    pub elapsed: Duration,
}

/// Runs one sweep from a fixed configuration
#[derive(Debug)]
pub struct SweepController {
    config: Arc<SweepConfig>,
    manager: InterpreterManager,
    executor: InferenceExecutor,
    store: Option<Arc<dyn ResultStore>>,
    events: EventSender,
    cancel: CancelToken,
}

impl SweepController {
    /// Controller for `config`, executing on `engine`.
    ///
    /// Results go to a [`JsonDirStore`] when `output.results_dir` is set.
    pub fn new(config: Arc<SweepConfig>, engine: Arc<dyn InterpreterFactory>) -> Self {
        let store = config
            .output
            .results_dir
            .as_ref()
            .map(|dir| Arc::new(JsonDirStore::new(dir)) as Arc<dyn ResultStore>);
        let executor = InferenceExecutor::new(InferenceConfig {
            timeout: config.inference_timeout(),
        });
        Self {
            config,
            manager: InterpreterManager::new(engine),
            executor,
            store,
            events: EventSender::detached(),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the result store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Send progress to a UI channel
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Use an existing cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configuration
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Token that stops this controller's sweep
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the whole sweep.
    ///
    /// Never fails: every error is contained, logged and counted in the
    /// returned summary. The UI channel always receives a completion event.
    pub fn run(&self) -> SweepSummary {
        let started = Instant::now();
        let mut summary = SweepSummary::default();
        let config = &self.config;

        self.events.log(format!(
            "Sweep start: devices {:?}, batch sizes {:?}, {} round(s), engine {}",
            config.devices.iter().map(Device::as_str).collect::<Vec<_>>(),
            config.batch_sizes,
            config.rounds,
            self.manager.engine_name()
        ));

        match self.prepare_aggregator(&mut summary) {
            Ok(mut aggregator) => {
                self.run_devices(&mut aggregator, &mut summary);
                aggregator.finish();
                summary.output_errors += aggregator.output_errors();
                summary.csv_rows = aggregator.csv_rows();
            }
            Err(e) => {
                self.events.log(format!("Sweep aborted: {e}"));
                summary.aborted_combinations += config.devices.len();
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.elapsed = started.elapsed();
        if summary.cancelled {
            self.events.log("Sweep cancelled");
        }
        self.events.log("DONE");
        self.events.complete(summary.clone());
        summary
    }

    fn prepare_aggregator(
        &self,
        summary: &mut SweepSummary,
    ) -> Result<ResultAggregator, SweepError> {
        let labels = Labels::from_file(&self.config.labels_path)?;

        let csv = match &self.config.output.csv_path {
            Some(path) => match CsvSink::create(path) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    self.events.log(format!("CSV output disabled: {e}"));
                    summary.output_errors += 1;
                    None
                }
            },
            None => None,
        };

        Ok(ResultAggregator::new(
            csv,
            self.store.clone(),
            self.events.clone(),
            labels,
            self.config.top_k,
        ))
    }

    fn run_devices(&self, aggregator: &mut ResultAggregator, summary: &mut SweepSummary) {
        let catalog = ModelCatalog::new(&self.config.models_dir);
        let families = if self.config.families.is_empty() {
            match catalog.families() {
                Ok(families) => families,
                Err(e) => {
                    self.events.log(format!("Cannot list model families: {e}"));
                    summary.aborted_combinations += self.config.devices.len();
                    return;
                }
            }
        } else {
            self.config.families.clone()
        };

        for &device in &self.config.devices {
            for family in &families {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.run_family(&catalog, device, family, aggregator, summary);
            }
        }
    }

    fn run_family(
        &self,
        catalog: &ModelCatalog,
        device: Device,
        family: &str,
        aggregator: &mut ResultAggregator,
        summary: &mut SweepSummary,
    ) {
        let models = match catalog.list(family) {
            Ok(models) => models,
            Err(e) => {
                self.events.log(format!("Skipping {family} on {device}: {e}"));
                summary.aborted_combinations += 1;
                return;
            }
        };

        for &batch_size in &self.config.batch_sizes {
            if self.cancel.is_cancelled() {
                return;
            }

            let images = match ImageSet::scan(&self.config.dataset_dir) {
                Ok(images) => images,
                Err(e) => {
                    self.events.log(format!("Skipping {family} on {device}: {e}"));
                    summary.aborted_combinations += 1;
                    return;
                }
            };

            let mut tier = FinalResult::new(device, family, batch_size);
            self.events.log(format!(
                "Tier {device}/{family}/b{batch_size}: {} models, {} images",
                models.len(),
                images.len()
            ));
            let complete = self.run_tier(&models, &images, &mut tier, aggregator, summary);
            tier.complete = complete;

            if tier.complete || !tier.models.is_empty() {
                if aggregator.finalize(tier).is_some() {
                    summary.tiers_persisted += 1;
                }
            } else {
                debug!("Dropping empty cancelled tier {device}/{family}/b{batch_size}");
            }
        }
    }

    /// Returns whether every round and model ran to the end
    fn run_tier(
        &self,
        models: &[ModelDescriptor],
        images: &ImageSet,
        tier: &mut FinalResult,
        aggregator: &mut ResultAggregator,
        summary: &mut SweepSummary,
    ) -> bool {
        let (device, batch_size) = (tier.device, tier.batch_size);
        let count = self.config.samples.count_for(batch_size);

        for round in 0..self.config.rounds {
            let sample = images.sample(self.config.seed, round, count);
            if sample.len() < batch_size {
                warn!(
                    "Round {round}: {} images cannot fill a batch of {batch_size}",
                    sample.len()
                );
            }

            for model in models {
                if self.cancel.is_cancelled() {
                    return false;
                }
                if let Some(reason) =
                    skip_reason(device, model, batch_size, &self.config.resolution_marker)
                {
                    if reason == SkipReason::GpuQuantized {
                        self.events.log(format!("Skipping {}: {reason}", model.name()));
                    } else {
                        debug!("Skipping {} at batch {batch_size}: {reason}", model.name());
                    }
                    summary.models_skipped += 1;
                    continue;
                }

                let mut handle = match self.manager.load(device, model.path(), batch_size) {
                    Ok(handle) => handle,
                    Err(e) => {
                        let error = SweepError::model_load(model.name(), e);
                        self.events.log(error.to_string());
                        summary.load_failures += 1;
                        continue;
                    }
                };
                summary.models_run += 1;
                debug!("{} mapped, {} bytes", model.name(), handle.model_size());

                let mut result = ModelResult::new(model.name(), round, batch_size, device);
                self.run_model(model, &mut handle, &sample, &mut result, aggregator, summary);
                drop(handle);

                aggregator.model_finished(&result);
                tier.push(result);
            }
        }
        !self.cancel.is_cancelled()
    }

    fn run_model(
        &self,
        model: &ModelDescriptor,
        handle: &mut InterpreterHandle,
        sample: &[ImageSample],
        result: &mut ModelResult,
        aggregator: &mut ResultAggregator,
        summary: &mut SweepSummary,
    ) {
        let batch_size = result.batch_size;
        let normalization = model.normalization();
        let (height, width) = (handle.image_height(), handle.image_width());
        let classes = handle.class_count();
        let output_dtype = handle.output_spec().dtype;

        // Trailing partial batches are dropped, never padded
        for chunk in sample.chunks_exact(batch_size) {
            if self.cancel.is_cancelled() {
                return;
            }

            let decoded: Result<Vec<DynamicImage>, _> =
                chunk.iter().map(|s| load_image(&s.path)).collect();
            let buffer = decoded.and_then(|images| {
                prepare_batch(&images, height, width, normalization, model.is_quantized())
            });
            let buffer = match buffer {
                Ok(buffer) => buffer,
                Err(e) => {
                    aggregator.record_failure(result, chunk, &e.to_string());
                    summary.prepare_failures += 1;
                    continue;
                }
            };

            match self.executor.run(handle, buffer.into_bytes()) {
                Ok(inference) => {
                    debug!(
                        "{}: {:.0} µs, {:.1} images/s",
                        model.name(),
                        inference.latency_us(),
                        inference.throughput_ips()
                    );
                    let probabilities = (batch_size == 1).then(|| {
                        let mut p = dequantize(&inference.output, output_dtype, normalization);
                        p.truncate(classes);
                        p
                    });
                    aggregator.record_success(
                        result,
                        inference.duration,
                        chunk,
                        probabilities.as_deref(),
                    );
                    summary.batches_executed += 1;
                }
                Err(e) => {
                    let error = SweepError::inference(model.name(), e.to_string());
                    warn!("{error}");
                    aggregator.record_failure(result, chunk, &e.to_string());
                    summary.inference_failures += 1;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ModelDescriptor {
        ModelDescriptor::new(format!("models/f/{name}"), "f")
    }

    #[test]
    fn test_gpu_skips_quantized() {
        let quant = descriptor("mobilenet_v1_1.0_224_quant.tflite");
        assert_eq!(
            skip_reason(Device::Gpu, &quant, 1, "224"),
            Some(SkipReason::GpuQuantized)
        );
        assert_eq!(skip_reason(Device::Cpu, &quant, 1, "224"), None);
        assert_eq!(skip_reason(Device::Nnapi, &quant, 1, "224"), None);
    }

    #[test]
    fn test_edge_accelerator_batch_one_only() {
        let edge = descriptor("mobilenet_v2_1.0_224_quant_edgetpu.tflite");
        assert_eq!(
            skip_reason(Device::EdgeAccelerator, &edge, 8, "224"),
            Some(SkipReason::EdgeAcceleratorBatched)
        );
        assert_eq!(skip_reason(Device::EdgeAccelerator, &edge, 1, "224"), None);
    }

    #[test]
    fn test_batched_requires_canonical_resolution() {
        let small = descriptor("mobilenet_v1_0.25_128.tflite");
        assert_eq!(
            skip_reason(Device::Cpu, &small, 4, "224"),
            Some(SkipReason::NonCanonicalResolution)
        );
        assert_eq!(skip_reason(Device::Cpu, &small, 1, "224"), None);
        assert_eq!(
            skip_reason(Device::Cpu, &descriptor("m_1.0_224.tflite"), 4, "224"),
            None
        );
    }

    #[test]
    fn test_missing_labels_abort_but_complete() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SweepConfig {
            models_dir: dir.path().join("models"),
            dataset_dir: dir.path().join("dataset"),
            labels_path: dir.path().join("missing.txt"),
            devices: vec![Device::Cpu],
            output: crate::config::OutputConfig::default(),
            ..SweepConfig::default()
        };
        let (tx, rx) = std::sync::mpsc::channel();
        let controller = SweepController::new(
            Arc::new(config),
            Arc::new(edgebench_engine::ReferenceEngine::new()),
        )
        .with_events(EventSender::new(tx));

        let summary = controller.run();
        assert_eq!(summary.aborted_combinations, 1);
        assert_eq!(summary.models_run, 0);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(
            events.last(),
            Some(crate::events::UiEvent::SweepComplete(_))
        ));
    }
}
