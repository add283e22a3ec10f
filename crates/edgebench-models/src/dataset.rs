// SPDX-License-Identifier: AGPL-3.0-only

//! Sample image sets
//!
//! Images are found by walking the data set directory. A file counts as an
//! image when its extension is known *and* its first bytes carry one of the
//! JPEG, PNG or GIF signatures in [`sniff_image`]; HTML error pages saved
//! with a `.jpg` name are skipped. Images stored one directory below the root take that
//! directory's name as their ground-truth label:
//!
//! ```text
//! dataset/
//! ├── tabby/        ← label
//! │   └── 001.jpg
//! └── goldfish/
//!     └── 002.png
//! ```

use crate::error::{ModelError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Leading-byte signatures; `None` matches any byte
const SIGNATURES: &[(ImageKind, &[Option<u8>])] = &[
    (ImageKind::Jpeg, &[Some(0xFF), Some(0xD8), Some(0xFF), Some(0xD8)]),
    (
        ImageKind::Jpeg,
        &[
            Some(0xFF), Some(0xD8), Some(0xFF), Some(0xE0), Some(0x00), Some(0x10),
            Some(b'J'), Some(b'F'), Some(b'I'), Some(b'F'), Some(0x00), Some(0x01),
        ],
    ),
    (ImageKind::Jpeg, &[Some(0xFF), Some(0xD8), Some(0xFF), Some(0xEE)]),
    (
        ImageKind::Jpeg,
        &[
            Some(0xFF), Some(0xD8), Some(0xFF), Some(0xE1), None, None,
            Some(b'E'), Some(b'x'), Some(b'i'), Some(b'f'), Some(0x00), Some(0x00),
        ],
    ),
    (
        ImageKind::Png,
        &[
            Some(0x89), Some(b'P'), Some(b'N'), Some(b'G'),
            Some(0x0D), Some(0x0A), Some(0x1A), Some(0x0A),
        ],
    ),
    (ImageKind::Gif, &[Some(b'G'), Some(b'I'), Some(b'F'), Some(b'8'), Some(b'7'), Some(b'a')]),
    (ImageKind::Gif, &[Some(b'G'), Some(b'I'), Some(b'F'), Some(b'8'), Some(b'9'), Some(b'a')]),
];

/// Recognised image container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    /// JPEG (JFIF, EXIF, Adobe or raw)
    Jpeg,
    /// PNG
    Png,
    /// GIF87a / GIF89a
    Gif,
}

/// Identify an image container from its leading bytes
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    SIGNATURES.iter().find_map(|(kind, signature)| {
        let matches = bytes.len() >= signature.len()
            && signature
                .iter()
                .zip(bytes)
                .all(|(expected, &b)| expected.map_or(true, |e| e == b));
        matches.then_some(*kind)
    })
}

/// One sample image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Ground-truth label from the parent directory, if nested
    pub label: Option<String>,
    /// Detected container
    pub kind: ImageKind,
}

impl ImageSample {
    /// File name for logs and result rows
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// All images found under a data set directory, in path order
#[derive(Debug, Clone)]
pub struct ImageSet {
    root: PathBuf,
    samples: Vec<ImageSample>,
}

impl ImageSet {
    /// Walk `root` and collect every image
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ListFailed`] if the root cannot be read.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ModelError::list_failed(&root, "not a directory"));
        }

        let mut samples = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ModelError::list_failed(&root, e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();

            let has_image_ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()));
            if !has_image_ext {
                continue;
            }

            match read_signature(path) {
                Ok(Some(kind)) => {
                    let label = (entry.depth() > 1)
                        .then(|| path.parent().and_then(Path::file_name))
                        .flatten()
                        .map(|n| n.to_string_lossy().into_owned());
                    samples.push(ImageSample {
                        path: path.to_path_buf(),
                        label,
                        kind,
                    });
                }
                Ok(None) => debug!("Skipping {}: not an image", path.display()),
                Err(e) => warn!("Skipping {}: {e}", path.display()),
            }
        }

        info!("Found {} images under {}", samples.len(), root.display());
        Ok(Self { root, samples })
    }

    /// Build from samples already in memory
    pub fn from_samples(root: impl AsRef<Path>, samples: Vec<ImageSample>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            samples,
        }
    }

    /// Data set root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All samples in path order
    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Number of images
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no images were found
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The sample for one round: shuffled with a seed derived from
    /// `(seed, round)`, then truncated to `count` when given.
    ///
    /// The same `(seed, round)` always yields the same order, so every model
    /// in a round sees identical inputs.
    pub fn sample(&self, seed: u64, round: usize, count: Option<usize>) -> Vec<ImageSample> {
        let round_key = (round as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ round_key);
        let mut picked = self.samples.clone();
        picked.shuffle(&mut rng);
        if let Some(n) = count {
            picked.truncate(n);
        }
        picked
    }
}

fn read_signature(path: &Path) -> std::io::Result<Option<ImageKind>> {
    let mut head = [0u8; 16];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(sniff_image(&head[..filled]))
}
