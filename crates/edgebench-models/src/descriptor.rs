// SPDX-License-Identifier: AGPL-3.0-only

//! Model descriptors
//!
//! Everything the sweep needs to know about a model before loading it is
//! derived from the file name: whether it is quantized, whether it targets
//! the edge accelerator, and how to normalize its inputs and outputs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File-name marker of quantized models
pub const QUANTIZED_MARKER: &str = "quant";

/// File-name marker of edge-accelerator models
pub const EDGE_ACCELERATOR_MARKER: &str = "edgetpu";

/// Pixel and probability normalization for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Subtracted from every raw channel value
    pub pixel_mean: f32,
    /// Divides every centered channel value
    pub pixel_scale: f32,
    /// Divides raw output values to obtain probabilities
    pub probability_scale: f32,
}

impl Normalization {
    /// Quantized models take raw bytes and emit 0..=255 scores
    pub const QUANTIZED: Self = Self {
        pixel_mean: 0.0,
        pixel_scale: 1.0,
        probability_scale: 255.0,
    };

    /// Float models take values in [-1, 1] and emit probabilities
    pub const FLOAT: Self = Self {
        pixel_mean: 127.5,
        pixel_scale: 127.5,
        probability_scale: 1.0,
    };

    /// Normalization for a quantized or float model
    pub const fn for_quantized(quantized: bool) -> Self {
        if quantized {
            Self::QUANTIZED
        } else {
            Self::FLOAT
        }
    }

    /// Normalize one raw channel value
    pub fn pixel(&self, raw: u8) -> f32 {
        (f32::from(raw) - self.pixel_mean) / self.pixel_scale
    }

    /// Turn one raw output value into a probability
    pub fn probability(&self, raw: f32) -> f32 {
        raw / self.probability_scale
    }
}

/// A model file plus the flags derived from its name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    name: String,
    family: String,
    path: PathBuf,
    quantized: bool,
    edge_accelerator: bool,
}

impl ModelDescriptor {
    /// Describe a model file belonging to `family`
    pub fn new(path: impl AsRef<Path>, family: impl Into<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let quantized = name.contains(QUANTIZED_MARKER);
        let edge_accelerator = name.contains(EDGE_ACCELERATOR_MARKER);
        Self {
            name,
            family: family.into(),
            path,
            quantized,
            edge_accelerator,
        }
    }

    /// File name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model family (catalog subdirectory)
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Full path to the model file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name contains [`QUANTIZED_MARKER`]
    pub const fn is_quantized(&self) -> bool {
        self.quantized
    }

    /// Name contains [`EDGE_ACCELERATOR_MARKER`]
    pub const fn is_edge_accelerator(&self) -> bool {
        self.edge_accelerator
    }

    /// Normalization derived from the quantization flag
    pub const fn normalization(&self) -> Normalization {
        Normalization::for_quantized(self.quantized)
    }

    /// Whether the name carries a resolution marker such as `"224"`
    pub fn matches_resolution(&self, marker: &str) -> bool {
        self.name.contains(marker)
    }
}
