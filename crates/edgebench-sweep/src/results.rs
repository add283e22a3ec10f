// SPDX-License-Identifier: AGPL-3.0-only

//! Result records
//!
//! ```text
//! FinalResult (one per device × family × batch size tier)
//! └── ModelResult (one per round × model)
//!     └── SingleInferenceResult (one per executed batch, or a failure)
//!         └── Prediction × top-K (batch size 1 only)
//! ```

use chrono::{DateTime, Utc};
use edgebench_engine::{Device, ElementType};
use edgebench_models::{Labels, Normalization};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One ranked label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Label text
    pub label: String,
    /// Output index
    pub index: usize,
    /// Dequantized probability
    pub probability: f32,
}

/// How one batch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Forward pass completed
    Success {
        /// Engine call duration in nanoseconds
        duration_ns: u64,
    },
    /// Preparation or inference failed
    Failed {
        /// Failure reason
        reason: String,
    },
}

/// Result of one executed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleInferenceResult {
    /// Timing or failure
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Image file names covered by the batch
    pub images: Vec<String>,
    /// Ground-truth label (batch size 1, nested images only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
    /// Ranked predictions (batch size 1 only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predictions: Vec<Prediction>,
}

impl SingleInferenceResult {
    /// Successful batch
    pub fn success(duration: Duration, images: Vec<String>) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let duration_ns = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        Self {
            outcome: Outcome::Success { duration_ns },
            images,
            ground_truth: None,
            predictions: Vec::new(),
        }
    }

    /// Failed batch
    pub fn failure(reason: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
            images,
            ground_truth: None,
            predictions: Vec::new(),
        }
    }

    /// Attach ground truth and predictions
    #[must_use]
    pub fn with_predictions(
        mut self,
        ground_truth: Option<String>,
        predictions: Vec<Prediction>,
    ) -> Self {
        self.ground_truth = ground_truth;
        self.predictions = predictions;
        self
    }

    /// Duration, if the batch succeeded
    pub fn duration(&self) -> Option<Duration> {
        match self.outcome {
            Outcome::Success { duration_ns } => Some(Duration::from_nanos(duration_ns)),
            Outcome::Failed { .. } => None,
        }
    }

    /// Whether the batch failed
    pub const fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    /// Whether the ground truth is among the first `k` predictions.
    /// `None` when there is nothing to compare.
    pub fn hit_within(&self, k: usize) -> Option<bool> {
        let truth = self.ground_truth.as_deref()?;
        if self.predictions.is_empty() {
            return None;
        }
        Some(self.predictions.iter().take(k).any(|p| p.label == truth))
    }
}

/// All batches of one model in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    /// Model file name
    pub model: String,
    /// Round index, from 0
    pub round: usize,
    /// Batch size
    pub batch_size: usize,
    /// Device
    pub device: Device,
    /// Batches in processing order
    pub results: Vec<SingleInferenceResult>,
}

impl ModelResult {
    /// Empty record
    pub fn new(model: impl Into<String>, round: usize, batch_size: usize, device: Device) -> Self {
        Self {
            model: model.into(),
            round,
            batch_size,
            device,
            results: Vec::new(),
        }
    }

    /// Number of recorded batches
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of failed batches
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }
}

/// Tier record: everything one (device, family, batch size) produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Device
    pub device: Device,
    /// Model family
    pub family: String,
    /// Batch size
    pub batch_size: usize,
    /// Every round and model finished (false after cancellation)
    pub complete: bool,
    /// Model records in processing order
    pub models: Vec<ModelResult>,
}

impl FinalResult {
    /// Empty tier record stamped with the current time
    pub fn new(device: Device, family: impl Into<String>, batch_size: usize) -> Self {
        Self {
            created_at: Utc::now(),
            device,
            family: family.into(),
            batch_size,
            complete: false,
            models: Vec::new(),
        }
    }

    /// Append a finished model record
    pub fn push(&mut self, model: ModelResult) {
        self.models.push(model);
    }

    /// Total recorded batches across all models
    pub fn inference_count(&self) -> usize {
        self.models.iter().map(ModelResult::len).sum()
    }

    /// Key identifying the tier in a store
    pub fn key(&self) -> String {
        format!(
            "{}_{}_b{}_{}",
            self.device,
            self.family,
            self.batch_size,
            self.created_at.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }
}

/// Turn raw output bytes into probabilities
///
/// Quantized outputs are `u8` and divided by the probability scale; float
/// outputs are native-order `f32`.
pub fn dequantize(output: &[u8], dtype: ElementType, normalization: Normalization) -> Vec<f32> {
    match dtype {
        ElementType::U8 => output
            .iter()
            .map(|&v| normalization.probability(f32::from(v)))
            .collect(),
        ElementType::F32 => output
            .chunks_exact(4)
            .map(|c| normalization.probability(f32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
    }
}

/// Top `k` predictions by repeated max extraction
///
/// Each pass takes the highest remaining probability and excludes that
/// index from later passes, so no label repeats. Ties go to the lower
/// index; NaN ranks below every number.
pub fn top_k(probabilities: &[f32], labels: &Labels, k: usize) -> Vec<Prediction> {
    let mut taken = vec![false; probabilities.len()];
    let mut ranked = Vec::with_capacity(k.min(probabilities.len()));

    for _ in 0..k.min(probabilities.len()) {
        let mut best: Option<usize> = None;
        for (i, &p) in probabilities.iter().enumerate() {
            if taken[i] {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let q = probabilities[b];
                    p > q || (q.is_nan() && !p.is_nan())
                }
            };
            if better {
                best = Some(i);
            }
        }
        let Some(index) = best else { break };
        taken[index] = true;
        ranked.push(Prediction {
            label: labels.name_of(index),
            index,
            probability: probabilities[index],
        });
    }
    ranked
}

/// Latency and accuracy summary of one model record
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStats {
    /// Successful batches
    pub batches: usize,
    /// Failed batches
    pub failures: usize,
    /// Mean latency
    pub mean: Duration,
    /// Median latency
    pub p50: Duration,
    /// 95th percentile latency
    pub p95: Duration,
    /// Images per second over the successful batches
    pub throughput: f64,
    /// Share of labelled images whose top prediction was right
    pub top1: Option<f64>,
    /// Share of labelled images with the truth in the top five
    pub top5: Option<f64>,
}

impl ModelStats {
    /// Summarize a model record
    pub fn from_result(result: &ModelResult) -> Self {
        let mut durations: Vec<Duration> = result
            .results
            .iter()
            .filter_map(SingleInferenceResult::duration)
            .collect();
        durations.sort_unstable();

        let mean = if durations.is_empty() {
            Duration::ZERO
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let n = durations.len() as u32;
            durations.iter().sum::<Duration>() / n
        };

        let busy = durations.iter().sum::<Duration>().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let throughput = if busy > 0.0 {
            (durations.len() * result.batch_size) as f64 / busy
        } else {
            0.0
        };

        Self {
            batches: durations.len(),
            failures: result.failures(),
            mean,
            p50: percentile(&durations, 0.50),
            p95: percentile(&durations, 0.95),
            throughput,
            top1: hit_rate(result, 1),
            top5: hit_rate(result, 5),
        }
    }
}

impl fmt::Display for ModelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} failed, mean {:.3} ms, p50 {:.3} ms, p95 {:.3} ms",
            self.batches,
            self.failures,
            self.mean.as_secs_f64() * 1e3,
            self.p50.as_secs_f64() * 1e3,
            self.p95.as_secs_f64() * 1e3
        )?;
        if self.batches > 0 {
            write!(f, ", {:.1} images/s", self.throughput)?;
        }
        if let (Some(top1), Some(top5)) = (self.top1, self.top5) {
            write!(f, ", top-1 {:.1}%, top-5 {:.1}%", top1 * 100.0, top5 * 100.0)?;
        }
        Ok(())
    }
}

/// Nearest-rank percentile of sorted durations
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn hit_rate(result: &ModelResult, k: usize) -> Option<f64> {
    let hits: Vec<bool> = result
        .results
        .iter()
        .filter_map(|r| r.hit_within(k))
        .collect();
    if hits.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let rate = hits.iter().filter(|&&h| h).count() as f64 / hits.len() as f64;
    Some(rate)
}
