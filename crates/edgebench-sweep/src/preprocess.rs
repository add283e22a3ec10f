// SPDX-License-Identifier: AGPL-3.0-only

//! Input preparation
//!
//! Every image goes through the same three steps, in order:
//!
//! 1. center-crop to the largest square that fits (side = min(w, h))
//! 2. nearest-neighbour resize to the model's input height and width
//! 3. per channel value, `(raw - mean) / scale`
//!
//! The result is RGB in HWC order. Quantized models receive `u8` elements,
//! float models `f32`. A batch is the prepared images concatenated in
//! input order, native byte order.

use crate::error::PrepareError;
use edgebench_engine::ElementType;
use edgebench_models::Normalization;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader};
use std::path::Path;

/// Channels fed to every model
pub const CHANNELS: usize = 3;

/// One prepared image
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    /// Quantized input
    U8(Vec<u8>),
    /// Float input
    F32(Vec<f32>),
}

impl Tensor {
    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    /// Whether the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::F32(_) => ElementType::F32,
        }
    }

    /// Size in bytes
    pub fn size_bytes(&self) -> usize {
        self.len() * self.element_type().size_bytes()
    }

    fn append_ne_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::U8(v) => out.extend_from_slice(v),
            Self::F32(v) => {
                for x in v {
                    out.extend_from_slice(&x.to_ne_bytes());
                }
            }
        }
    }
}

/// Open and decode an image file
///
/// The format is detected from content, not from the extension.
///
/// # Errors
///
/// Returns [`PrepareError::Decode`] if the file cannot be opened or decoded.
pub fn load_image(path: &Path) -> Result<DynamicImage, PrepareError> {
    let decode_err = |reason: String| PrepareError::Decode {
        path: path.to_path_buf(),
        reason,
    };
    ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))
}

/// Largest centered square of `image`
pub fn center_crop(image: &DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let side = width.min(height);
    image.crop_imm((width - side) / 2, (height - side) / 2, side, side)
}

/// Prepare one image for a model input of `target_height × target_width`
pub fn prepare(
    image: &DynamicImage,
    target_height: usize,
    target_width: usize,
    normalization: Normalization,
    quantized: bool,
) -> Tensor {
    let cropped = center_crop(image).to_rgb8();
    #[allow(clippy::cast_possible_truncation)]
    let resized = imageops::resize(
        &cropped,
        target_width as u32,
        target_height as u32,
        FilterType::Nearest,
    );

    let raw = resized.into_raw();
    if quantized {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Tensor::U8(
            raw.iter()
                .map(|&v| normalization.pixel(v).round().clamp(0.0, 255.0) as u8)
                .collect(),
        )
    } else {
        Tensor::F32(raw.iter().map(|&v| normalization.pixel(v)).collect())
    }
}

/// Prepared tensors of one batch, concatenated into one input buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchBuffer {
    bytes: Vec<u8>,
    images: usize,
    dtype: Option<ElementType>,
}

impl BatchBuffer {
    /// Empty buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            images: 0,
            dtype: None,
        }
    }

    /// Append one prepared image
    ///
    /// # Errors
    ///
    /// Returns [`PrepareError::MixedTypes`] if the tensor's element type
    /// differs from earlier ones.
    pub fn push(&mut self, tensor: &Tensor) -> Result<(), PrepareError> {
        let dtype = tensor.element_type();
        match self.dtype {
            Some(existing) if existing != dtype => return Err(PrepareError::MixedTypes),
            _ => self.dtype = Some(dtype),
        }
        tensor.append_ne_bytes(&mut self.bytes);
        self.images += 1;
        Ok(())
    }

    /// Images in the buffer
    pub const fn image_count(&self) -> usize {
        self.images
    }

    /// Buffer size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been pushed
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes, ready for the executor
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Prepare every image and concatenate them in order
///
/// # Errors
///
/// Returns error if the prepared tensors cannot share one buffer.
pub fn prepare_batch(
    images: &[DynamicImage],
    target_height: usize,
    target_width: usize,
    normalization: Normalization,
    quantized: bool,
) -> Result<BatchBuffer, PrepareError> {
    let element = if quantized { 1 } else { 4 };
    let per_image = target_height * target_width * CHANNELS * element;
    let mut batch = BatchBuffer::with_capacity(images.len() * per_image);
    for image in images {
        let tensor = prepare(image, target_height, target_width, normalization, quantized);
        batch.push(&tensor)?;
    }
    Ok(batch)
}
