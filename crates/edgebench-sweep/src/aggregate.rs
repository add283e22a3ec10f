// SPDX-License-Identifier: AGPL-3.0-only

//! Result aggregation
//!
//! The aggregator is the only writer of results during a sweep. Each
//! recorded batch lands in three places: the in-memory [`ModelResult`],
//! the CSV stream (when configured) and the UI log. Tier records go to the
//! result store on [`ResultAggregator::finalize`].
//!
//! Output failures never stop a sweep; they are logged and counted.

use crate::csv::{CsvRow, CsvSink};
use crate::events::EventSender;
use crate::results::{top_k, FinalResult, ModelResult, ModelStats, SingleInferenceResult};
use crate::store::ResultStore;
use edgebench_models::{ImageSample, Labels};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Collects per-batch results into model and tier records
#[derive(Debug)]
pub struct ResultAggregator {
    csv: Option<CsvSink>,
    store: Option<Arc<dyn ResultStore>>,
    events: EventSender,
    labels: Labels,
    top_k: usize,
    output_errors: usize,
}

impl ResultAggregator {
    /// Aggregator writing to the given outputs
    pub fn new(
        csv: Option<CsvSink>,
        store: Option<Arc<dyn ResultStore>>,
        events: EventSender,
        labels: Labels,
        top_k: usize,
    ) -> Self {
        Self {
            csv,
            store,
            events,
            labels,
            top_k,
            output_errors: 0,
        }
    }

    /// Record a successful batch.
    ///
    /// `probabilities` is given for batch size 1 only; the top-K are then
    /// extracted and each becomes a CSV row and a log line. Without it only
    /// the duration is recorded.
    pub fn record_success(
        &mut self,
        model: &mut ModelResult,
        duration: Duration,
        images: &[ImageSample],
        probabilities: Option<&[f32]>,
    ) {
        let names = file_names(images);
        let ms = duration.as_secs_f64() * 1e3;
        let mut single = SingleInferenceResult::success(duration, names);

        if let Some(probabilities) = probabilities {
            let truth = images.first().and_then(|s| s.label.clone());
            let ranked = top_k(probabilities, &self.labels, self.top_k);
            let image = images.first().map(ImageSample::file_name).unwrap_or_default();

            for prediction in &ranked {
                self.events.log(format!(
                    "{} {image}: {} {:.4} ({ms:.3} ms)",
                    model.model, prediction.label, prediction.probability
                ));
                self.write_row(&CsvRow::prediction(
                    &model.model,
                    truth.as_deref(),
                    ms,
                    &prediction.label,
                    prediction.probability,
                ));
            }
            single = single.with_predictions(truth, ranked);
        } else {
            self.events.log(format!(
                "{} batch {} × {}: {ms:.3} ms",
                model.model,
                model.len(),
                images.len()
            ));
            self.write_row(&CsvRow::timing(&model.model, ms));
        }

        model.results.push(single);
    }

    /// Record a failed batch
    pub fn record_failure(
        &mut self,
        model: &mut ModelResult,
        images: &[ImageSample],
        reason: &str,
    ) {
        let truth = match images {
            [only] => only.label.as_deref(),
            _ => None,
        };
        self.events.log(format!("{} FAILED: {reason}", model.model));
        self.write_row(&CsvRow::failure(&model.model, truth, reason));
        model
            .results
            .push(SingleInferenceResult::failure(reason, file_names(images)));
    }

    /// Log the summary line of a finished model record
    pub fn model_finished(&self, model: &ModelResult) -> ModelStats {
        let stats = ModelStats::from_result(model);
        self.events.log(format!(
            "{} on {} (round {}, batch {}): {stats}",
            model.model, model.device, model.round, model.batch_size
        ));
        stats
    }

    /// Persist a tier record to the result store
    ///
    /// Returns the store key, or `None` when no store is configured or the
    /// write failed.
    pub fn finalize(&mut self, result: FinalResult) -> Option<String> {
        let store = self.store.as_ref()?;
        let models = result.models.len();
        match store.persist(result) {
            Ok(key) => {
                debug!("Finalized tier {key} ({models} model results)");
                Some(key)
            }
            Err(e) => {
                self.output_errors += 1;
                self.events
                    .log(format!("Could not store results in {}: {e}", store.describe()));
                None
            }
        }
    }

    /// Flush the CSV stream
    pub fn finish(&mut self) {
        if let Some(csv) = self.csv.as_mut() {
            if let Err(e) = csv.flush() {
                warn!("CSV flush failed: {e}");
                self.output_errors += 1;
            }
        }
    }

    /// Failed CSV or store writes so far
    pub const fn output_errors(&self) -> usize {
        self.output_errors
    }

    /// Rows written to the CSV stream
    pub fn csv_rows(&self) -> usize {
        self.csv.as_ref().map_or(0, CsvSink::rows)
    }

    fn write_row(&mut self, row: &CsvRow) {
        if let Some(csv) = self.csv.as_mut() {
            if let Err(e) = csv.write_row(row) {
                warn!("CSV write failed: {e}");
                self.output_errors += 1;
            }
        }
    }
}

fn file_names(images: &[ImageSample]) -> Vec<String> {
    images.iter().map(ImageSample::file_name).collect()
}
