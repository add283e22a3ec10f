// SPDX-License-Identifier: AGPL-3.0-only

#![deny(unsafe_code)]

//! Benchmark assets for edgebench
//!
//! Three kinds of input feed a sweep, all read from plain directories:
//!
//! - **Models**: `<models_dir>/<family>/<file>`, listed by [`ModelCatalog`].
//!   Flags such as quantization are derived from the file name by
//!   [`ModelDescriptor`].
//! - **Labels**: one class per line, line order = output index ([`Labels`]).
//! - **Images**: everything under the data set root that looks like an
//!   image ([`ImageSet`]); nested images carry their directory as label.
//!
//! # Example
//!
//! ```no_run
//! use edgebench_models::{ImageSet, ModelCatalog};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ModelCatalog::new("models");
//! for family in catalog.families()? {
//!     for model in catalog.list(&family)? {
//!         println!("{family}: {} quantized={}", model.name(), model.is_quantized());
//!     }
//! }
//!
//! let images = ImageSet::scan("dataset")?;
//! let round0 = images.sample(7, 0, Some(50));
//! println!("{} images in round 0", round0.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod catalog;
mod dataset;
mod descriptor;
mod error;
mod labels;

pub use catalog::ModelCatalog;
pub use dataset::{sniff_image, ImageKind, ImageSample, ImageSet};
pub use descriptor::{ModelDescriptor, Normalization, EDGE_ACCELERATOR_MARKER, QUANTIZED_MARKER};
pub use error::{ModelError, Result};
pub use labels::Labels;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{ImageSet, Labels, ModelCatalog, ModelDescriptor, Normalization, Result};
}
