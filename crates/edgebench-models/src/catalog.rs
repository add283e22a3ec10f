// SPDX-License-Identifier: AGPL-3.0-only

//! Model catalog
//!
//! Models live in one subdirectory per family:
//!
//! ```text
//! models/
//! ├── mobilenet_v1/
//! │   ├── mobilenet_v1_0.25_128.tflite
//! │   ├── mobilenet_v1_1.0_224.tflite
//! │   └── mobilenet_v1_1.0_224_quant.tflite
//! └── mobilenet_v2/
//!     └── ...
//! ```
//!
//! Listing is pure: nothing is cached between calls, so files added during
//! a sweep show up in the next tier.

use crate::descriptor::ModelDescriptor;
use crate::error::{ModelError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lists model families and model files under a base directory
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    base_dir: PathBuf,
}

impl ModelCatalog {
    /// Catalog rooted at `base_dir`
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Family subdirectories, sorted by name
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ListFailed`] if the base directory is unreadable.
    pub fn families(&self) -> Result<Vec<String>> {
        let mut families: Vec<String> = read_entries(&self.base_dir)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .filter(|n| !n.starts_with('.'))
            .collect();
        families.sort();
        Ok(families)
    }

    /// Model files of one family, sorted by file name
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ListFailed`] if the family directory is unreadable.
    pub fn list(&self, family: &str) -> Result<Vec<ModelDescriptor>> {
        let dir = self.base_dir.join(family);
        let mut models: Vec<ModelDescriptor> = read_entries(&dir)?
            .into_iter()
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| !n.to_string_lossy().starts_with('.'))
            })
            .map(|p| ModelDescriptor::new(p, family))
            .collect();
        models.sort_by(|a, b| a.name().cmp(b.name()));

        debug!("Family {family}: {} models in {}", models.len(), dir.display());
        Ok(models)
    }

    /// Print catalog status
    ///
    /// # Errors
    ///
    /// Returns error if the base directory or a family is unreadable.
    pub fn print_status(&self) -> Result<()> {
        println!("\nModel catalog");
        println!("{}", "=".repeat(72));
        println!("Base: {}", self.base_dir.display());
        println!();

        for family in self.families()? {
            let models = self.list(&family)?;
            println!("  {family} ({} models)", models.len());
            for model in &models {
                let size = fs::metadata(model.path()).map(|m| m.len()).unwrap_or(0);
                let flags = match (model.is_quantized(), model.is_edge_accelerator()) {
                    (true, true) => "quant edgetpu",
                    (true, false) => "quant",
                    (false, true) => "edgetpu",
                    (false, false) => "float",
                };
                println!("    {:48} {:>10} bytes  [{flags}]", model.name(), size);
            }
            println!();
        }

        println!("{}", "=".repeat(72));
        Ok(())
    }
}

fn read_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| ModelError::list_failed(dir, e.to_string()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ModelError::list_failed(dir, e.to_string()))?;
        paths.push(entry.path());
    }
    Ok(paths)
}
