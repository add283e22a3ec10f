// SPDX-License-Identifier: AGPL-3.0-only

//! Label files: one label per line, line order = output index order

use crate::error::{ModelError, Result};
use std::fs;
use std::path::Path;

/// Class labels indexed by model output position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    labels: Vec<String>,
}

impl Labels {
    /// Read a label file
    ///
    /// Trailing whitespace is trimmed; blank lines are kept so indices stay
    /// aligned with the model output.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable, or empty.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::LabelsNotFound {
                path: path.to_path_buf(),
            });
        }

        let text = fs::read_to_string(path)?;
        let labels = Self::from_lines(text.lines());
        if labels.is_empty() {
            return Err(ModelError::LabelsEmpty {
                path: path.to_path_buf(),
            });
        }

        tracing::info!("Loaded {} labels from {}", labels.len(), path.display());
        Ok(labels)
    }

    /// Build from in-memory lines
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<String> = lines
            .into_iter()
            .map(|l| l.as_ref().trim_end().to_string())
            .collect();
        while labels.last().is_some_and(String::is_empty) {
            labels.pop();
        }
        Self { labels }
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no labels
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at an output index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Label at an output index, or `#index` when the file is short
    pub fn name_of(&self, index: usize) -> String {
        self.get(index)
            .map_or_else(|| format!("#{index}"), ToString::to_string)
    }

    /// All labels in index order
    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lines_keeps_order() {
        let labels = Labels::from_lines(["background", "tench", "goldfish", ""]);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(1), Some("tench"));
        assert_eq!(labels.name_of(7), "#7");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("labels.txt");
        fs::write(&path, "cat\r\ndog\nbird\n").unwrap();

        let labels = Labels::from_file(&path).unwrap();
        assert_eq!(labels.as_slice(), &["cat", "dog", "bird"]);
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("labels.txt");
        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(
            Labels::from_file(&path),
            Err(ModelError::LabelsEmpty { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Labels::from_file("/nonexistent/labels.txt"),
            Err(ModelError::LabelsNotFound { .. })
        ));
    }
}
