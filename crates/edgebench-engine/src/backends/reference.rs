// SPDX-License-Identifier: AGPL-3.0-only

//! Reference engine
//!
//! A pure-Rust image classifier that implements the engine traits so a
//! whole sweep can run without a native inference library. It is useful
//! for:
//!
//! 1. **CI without an accelerator**: every sweep path (CPU, multi-thread,
//!    delegates, batching, quantized outputs) executes for real.
//! 2. **Harness validation**: timings and top-K extraction can be checked
//!    against a model whose outputs are fully deterministic.
//!
//! ## Model format
//!
//! ```text
//! [magic "EBM1"][H u32 LE][W u32 LE][C u32 LE][K u32 LE][flags u8][pad 3]
//! [weights f32 LE × K·C][bias f32 LE × K]
//! ```
//!
//! `flags & 1` marks a quantized model (u8 input, u8 output probabilities).
//!
//! ## Computation
//!
//! Per image: the mean of each channel (mapped to roughly [-1, 1]) forms a
//! C-dim feature vector, a dense layer produces K logits, softmax turns them
//! into probabilities.

use crate::backend::{Delegate, EngineOptions};
use crate::engine::{ElementType, Interpreter, InterpreterFactory, TensorSpec};
use crate::error::{EngineError, Result};
use crate::mmap::MappedModel;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Magic bytes at the start of every reference model
pub const REFERENCE_MAGIC: &[u8; 4] = b"EBM1";

const HEADER_LEN: usize = 24;
const FLAG_QUANTIZED: u8 = 1;

/// Architecture of a reference model
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceModelSpec {
    /// Input height
    pub height: usize,
    /// Input width
    pub width: usize,
    /// Input channels
    pub channels: usize,
    /// Output classes
    pub classes: usize,
    /// u8 input/output when set
    pub quantized: bool,
    /// Dense weights, row-major `[classes × channels]`
    pub weights: Vec<f32>,
    /// Dense bias, `[classes]`
    pub bias: Vec<f32>,
}

impl ReferenceModelSpec {
    /// Create a spec with deterministic, non-trivial weights.
    ///
    /// Weights depend only on the dimensions, so two packs of the same
    /// shape are byte-identical.
    pub fn new(height: usize, width: usize, classes: usize, quantized: bool) -> Self {
        let channels = 3;
        #[allow(clippy::cast_precision_loss)]
        let weights = (0..classes * channels)
            .map(|i| ((i * 7919 % 97) as f32 / 48.5) - 1.0)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let bias = (0..classes)
            .map(|i| ((i * 31 % 17) as f32 / 17.0) - 0.5)
            .collect();
        Self {
            height,
            width,
            channels,
            classes,
            quantized,
            weights,
            bias,
        }
    }

    /// Serialize into the reference model format
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn pack(&self) -> Vec<u8> {
        let mut blob =
            Vec::with_capacity(HEADER_LEN + (self.weights.len() + self.bias.len()) * 4);
        blob.extend_from_slice(REFERENCE_MAGIC);
        blob.extend_from_slice(&(self.height as u32).to_le_bytes());
        blob.extend_from_slice(&(self.width as u32).to_le_bytes());
        blob.extend_from_slice(&(self.channels as u32).to_le_bytes());
        blob.extend_from_slice(&(self.classes as u32).to_le_bytes());
        blob.push(if self.quantized { FLAG_QUANTIZED } else { 0 });
        blob.extend_from_slice(&[0u8; 3]);
        for &w in &self.weights {
            blob.extend_from_slice(&w.to_le_bytes());
        }
        for &b in &self.bias {
            blob.extend_from_slice(&b.to_le_bytes());
        }
        blob
    }

    /// Parse the reference model format
    ///
    /// # Errors
    ///
    /// Returns error if the magic, header or payload length is wrong.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN || &data[..4] != REFERENCE_MAGIC {
            return Err(EngineError::invalid_model(
                "missing EBM1 header (not a reference model)",
            ));
        }

        let read_u32 = |offset: usize| -> usize {
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[offset..offset + 4]);
            u32::from_le_bytes(word) as usize
        };

        let height = read_u32(4);
        let width = read_u32(8);
        let channels = read_u32(12);
        let classes = read_u32(16);
        let quantized = data[20] & FLAG_QUANTIZED != 0;

        if height == 0 || width == 0 || channels == 0 || classes == 0 {
            return Err(EngineError::invalid_model(format!(
                "degenerate dimensions {height}x{width}x{channels} → {classes}"
            )));
        }

        // Header fields are untrusted; sizes that overflow are a corrupt model
        let overflow = || EngineError::invalid_model("header dimensions overflow");
        height
            .checked_mul(width)
            .and_then(|n| n.checked_mul(channels))
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(overflow)?;
        let expected = classes
            .checked_mul(channels)
            .and_then(|n| n.checked_add(classes))
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(overflow)?;
        if data.len() != expected {
            return Err(EngineError::invalid_model(format!(
                "payload size mismatch: got {} bytes, expected {expected}",
                data.len()
            )));
        }

        let floats: Vec<f32> = data[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let (weights, bias) = floats.split_at(classes * channels);

        Ok(Self {
            height,
            width,
            channels,
            classes,
            quantized,
            weights: weights.to_vec(),
            bias: bias.to_vec(),
        })
    }
}

/// Factory for reference interpreters
#[derive(Debug, Clone, Default)]
pub struct ReferenceEngine {
    /// Delegates that fail to attach (simulates missing drivers)
    unavailable: Vec<Delegate>,
}

impl ReferenceEngine {
    /// Engine with every delegate available
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a delegate as unavailable on this host
    #[must_use]
    pub fn without_delegate(mut self, delegate: Delegate) -> Self {
        self.unavailable.push(delegate);
        self
    }
}

impl InterpreterFactory for ReferenceEngine {
    fn name(&self) -> &str {
        "reference"
    }

    fn build(
        &self,
        model: Arc<MappedModel>,
        options: &EngineOptions,
    ) -> Result<Box<dyn Interpreter>> {
        let spec = ReferenceModelSpec::parse(&model)?;

        for delegate in &options.delegates {
            if self.unavailable.contains(delegate) {
                return Err(EngineError::delegate_unavailable(
                    delegate.to_string(),
                    "not supported on this host",
                ));
            }
            // Mirrors the GPU delegate's lack of integer kernels
            if *delegate == Delegate::Gpu && spec.quantized {
                return Err(EngineError::delegate_unavailable(
                    delegate.to_string(),
                    "quantized models are not supported",
                ));
            }
        }

        let pool = if options.num_threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(options.num_threads)
                    .build()
                    .map_err(|e| EngineError::execution_failed(format!("thread pool: {e}")))?,
            )
        } else {
            None
        };

        info!(
            "Reference interpreter for {}: {}x{}x{} → {} ({}), threads={}, delegates={:?}",
            model.file_name(),
            spec.height,
            spec.width,
            spec.channels,
            spec.classes,
            if spec.quantized { "u8" } else { "f32" },
            options.num_threads,
            options.delegates
        );

        Ok(Box::new(ReferenceInterpreter::new(spec, pool)))
    }
}

/// Interpreter over one parsed reference model
pub struct ReferenceInterpreter {
    spec: ReferenceModelSpec,
    input: TensorSpec,
    output: TensorSpec,
    pool: Option<rayon::ThreadPool>,
}

impl ReferenceInterpreter {
    fn new(spec: ReferenceModelSpec, pool: Option<rayon::ThreadPool>) -> Self {
        let dtype = if spec.quantized {
            ElementType::U8
        } else {
            ElementType::F32
        };
        let input = TensorSpec::new(vec![1, spec.height, spec.width, spec.channels], dtype);
        let output = TensorSpec::new(vec![1, spec.classes], dtype);
        Self {
            spec,
            input,
            output,
            pool,
        }
    }

    fn classify(&self, image: &[u8]) -> Vec<f32> {
        let channels = self.spec.channels;
        let mut sums = vec![0.0f64; channels];

        match self.input.dtype {
            ElementType::U8 => {
                for (i, &v) in image.iter().enumerate() {
                    sums[i % channels] += f64::from(v) / 127.5 - 1.0;
                }
            }
            ElementType::F32 => {
                for (i, c) in image.chunks_exact(4).enumerate() {
                    sums[i % channels] += f64::from(f32::from_ne_bytes([c[0], c[1], c[2], c[3]]));
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let pixels = (self.spec.height * self.spec.width) as f64;
        #[allow(clippy::cast_possible_truncation)]
        let features: Vec<f32> = sums.iter().map(|s| (s / pixels) as f32).collect();

        let logits: Vec<f32> = (0..self.spec.classes)
            .map(|k| {
                let row = &self.spec.weights[k * channels..(k + 1) * channels];
                row.iter().zip(&features).map(|(w, x)| w * x).sum::<f32>() + self.spec.bias[k]
            })
            .collect();

        softmax(&logits)
    }

    fn encode(&self, probs: &[f32], out: &mut Vec<u8>) {
        match self.output.dtype {
            ElementType::U8 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                out.extend(probs.iter().map(|p| (p * 255.0).round().clamp(0.0, 255.0) as u8));
            }
            ElementType::F32 => {
                for p in probs {
                    out.extend_from_slice(&p.to_ne_bytes());
                }
            }
        }
    }
}

impl Interpreter for ReferenceInterpreter {
    fn input_spec(&self) -> &TensorSpec {
        &self.input
    }

    fn output_spec(&self) -> &TensorSpec {
        &self.output
    }

    fn resize_input(&mut self, batch: usize) -> Result<()> {
        if batch == 0 {
            return Err(EngineError::execution_failed("batch size must be positive"));
        }
        if self.input.size_bytes().checked_mul(batch).is_none() {
            return Err(EngineError::execution_failed(format!(
                "batch {batch} overflows the input tensor size"
            )));
        }
        self.input = self.input.with_batch(batch);
        self.output = self.output.with_batch(batch);
        debug!("Resized reference interpreter to batch {batch}");
        Ok(())
    }

    fn invoke(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let expected = self.input.size_bytes();
        if input.len() != expected {
            return Err(EngineError::ShapeMismatch {
                expected,
                actual: input.len(),
            });
        }

        let per_image = expected / self.input.batch();
        let probs: Vec<Vec<f32>> = match &self.pool {
            Some(pool) => pool.install(|| {
                input
                    .par_chunks_exact(per_image)
                    .map(|image| self.classify(image))
                    .collect()
            }),
            None => input
                .chunks_exact(per_image)
                .map(|image| self.classify(image))
                .collect(),
        };

        let mut out = Vec::with_capacity(self.output.size_bytes());
        for p in &probs {
            self.encode(p, &mut out);
        }
        Ok(out)
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mapped(spec: &ReferenceModelSpec) -> (tempfile::NamedTempFile, Arc<MappedModel>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&spec.pack()).unwrap();
        let model = Arc::new(MappedModel::open(file.path()).unwrap());
        (file, model)
    }

    #[test]
    fn pack_and_parse_roundtrip() {
        let spec = ReferenceModelSpec::new(8, 6, 5, true);
        let parsed = ReferenceModelSpec::parse(&spec.pack()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn parse_rejects_foreign_bytes() {
        let err = ReferenceModelSpec::parse(b"TFL3 not ours at all....").unwrap_err();
        assert!(matches!(err, EngineError::InvalidModel { .. }));
    }

    #[test]
    fn parse_rejects_truncated_payload() {
        let mut blob = ReferenceModelSpec::new(4, 4, 3, false).pack();
        blob.truncate(blob.len() - 4);
        assert!(ReferenceModelSpec::parse(&blob).is_err());
    }

    fn header(height: u32, width: u32, channels: u32, classes: u32) -> Vec<u8> {
        let mut blob = REFERENCE_MAGIC.to_vec();
        for word in [height, width, channels, classes] {
            blob.extend_from_slice(&word.to_le_bytes());
        }
        blob.extend_from_slice(&[0; 4]);
        blob
    }

    #[test]
    fn parse_rejects_overflowing_payload_size() {
        let blob = header(4, 4, u32::MAX, u32::MAX);
        let err = ReferenceModelSpec::parse(&blob).unwrap_err();
        assert!(matches!(err, EngineError::InvalidModel { .. }));
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn parse_rejects_overflowing_input_size() {
        let blob = header(u32::MAX, u32::MAX, 3, 1);
        let err = ReferenceModelSpec::parse(&blob).unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn float_model_outputs_probabilities() {
        let spec = ReferenceModelSpec::new(4, 4, 6, false);
        let (_f, model) = mapped(&spec);
        let mut interp = ReferenceEngine::new()
            .build(model, &EngineOptions::default())
            .unwrap();

        let input = vec![0u8; interp.input_spec().size_bytes()];
        let out = interp.invoke(&input).unwrap();
        assert_eq!(out.len(), 6 * 4);

        let probs: Vec<f32> = out
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-4, "softmax sums to {total}");
    }

    #[test]
    fn quantized_model_outputs_bytes() {
        let spec = ReferenceModelSpec::new(4, 4, 10, true);
        let (_f, model) = mapped(&spec);
        let mut interp = ReferenceEngine::new()
            .build(model, &EngineOptions::default())
            .unwrap();

        assert_eq!(interp.input_spec().dtype, ElementType::U8);
        let input = vec![128u8; 4 * 4 * 3];
        let out = interp.invoke(&input).unwrap();
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn batched_invoke_matches_single() {
        let spec = ReferenceModelSpec::new(4, 4, 5, false);
        let (_f, model) = mapped(&spec);
        let options = EngineOptions {
            num_threads: 4,
            delegates: Vec::new(),
        };
        let mut single = ReferenceEngine::new().build(model.clone(), &options).unwrap();
        let mut batched = ReferenceEngine::new().build(model, &options).unwrap();
        batched.resize_input(3).unwrap();

        let image: Vec<u8> = (0..4 * 4 * 3)
            .flat_map(|i| (i as f32 / 24.0 - 1.0).to_ne_bytes())
            .collect();
        let one = single.invoke(&image).unwrap();
        let three = batched.invoke(&image.repeat(3)).unwrap();
        assert_eq!(three, one.repeat(3));
    }

    #[test]
    fn invoke_rejects_wrong_size() {
        let spec = ReferenceModelSpec::new(4, 4, 5, false);
        let (_f, model) = mapped(&spec);
        let mut interp = ReferenceEngine::new()
            .build(model, &EngineOptions::default())
            .unwrap();
        let err = interp.invoke(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { .. }));
    }

    #[test]
    fn gpu_delegate_rejects_quantized() {
        let spec = ReferenceModelSpec::new(4, 4, 5, true);
        let (_f, model) = mapped(&spec);
        let options = EngineOptions {
            num_threads: 1,
            delegates: vec![Delegate::Gpu],
        };
        let err = ReferenceEngine::new().build(model, &options).err().unwrap();
        assert!(matches!(err, EngineError::DelegateUnavailable { .. }));
    }

    #[test]
    fn unavailable_delegate_fails_build() {
        let spec = ReferenceModelSpec::new(4, 4, 5, false);
        let (_f, model) = mapped(&spec);
        let options = EngineOptions {
            num_threads: 1,
            delegates: vec![Delegate::Nnapi],
        };
        let engine = ReferenceEngine::new().without_delegate(Delegate::Nnapi);
        assert!(engine.build(model, &options).is_err());
    }
}
