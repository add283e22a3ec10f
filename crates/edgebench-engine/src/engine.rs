// SPDX-License-Identifier: AGPL-3.0-only

//! Engine seam
//!
//! The inference engine is an external collaborator. Anything that can
//! build an [`Interpreter`] from mapped model bytes and [`EngineOptions`]
//! can be benchmarked.

use crate::backend::EngineOptions;
use crate::error::Result;
use crate::mmap::MappedModel;
use std::fmt::Debug;
use std::sync::Arc;

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// Unsigned 8-bit (quantized models)
    U8,
    /// 32-bit float, native byte order
    F32,
}

impl ElementType {
    /// Bytes per element
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F32 => 4,
        }
    }
}

/// Shape and element type of an input or output tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    /// Dimensions, leading dimension is the batch
    pub shape: Vec<usize>,

    /// Element type
    pub dtype: ElementType,
}

impl TensorSpec {
    /// Create a tensor spec
    pub fn new(shape: Vec<usize>, dtype: ElementType) -> Self {
        Self { shape, dtype }
    }

    /// Number of elements
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total size in bytes
    pub fn size_bytes(&self) -> usize {
        self.elements() * self.dtype.size_bytes()
    }

    /// Leading (batch) dimension
    pub fn batch(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Copy of this spec with the leading dimension replaced
    pub fn with_batch(&self, batch: usize) -> Self {
        let mut shape = self.shape.clone();
        match shape.first_mut() {
            Some(lead) => *lead = batch,
            None => shape.push(batch),
        }
        Self {
            shape,
            dtype: self.dtype,
        }
    }
}

/// A built interpreter for one model with one set of options.
///
/// Interpreters are driven from a single engine thread and are never
/// shared.
pub trait Interpreter: Send {
    /// Input tensor spec (`[batch, height, width, channels]` for images)
    fn input_spec(&self) -> &TensorSpec;

    /// Output tensor spec (`[batch, classes]` for classifiers)
    fn output_spec(&self) -> &TensorSpec;

    /// Resize the input batch dimension; the output batch follows.
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot reallocate tensors for the new shape.
    fn resize_input(&mut self, batch: usize) -> Result<()>;

    /// Run one forward pass over a contiguous input buffer.
    ///
    /// # Errors
    ///
    /// Returns error on shape mismatch or any failure inside the engine.
    fn invoke(&mut self, input: &[u8]) -> Result<Vec<u8>>;
}

/// Builds interpreters; one factory serves a whole sweep.
pub trait InterpreterFactory: Debug + Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Build an interpreter from mapped model bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be parsed or a requested delegate
    /// cannot be attached.
    fn build(&self, model: Arc<MappedModel>, options: &EngineOptions)
        -> Result<Box<dyn Interpreter>>;
}
