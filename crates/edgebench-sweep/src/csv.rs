// SPDX-License-Identifier: AGPL-3.0-only

//! CSV result stream
//!
//! One row per top-K entry at batch size 1, one row per batch otherwise,
//! one row per failure. `InferenceTime` is in milliseconds; failures write
//! `FAILED` there and put the reason under `Recognition`.

use crate::error::StoreError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Header line
pub const CSV_HEADER: &str = "ModelName,Label,InferenceTime,Recognition,Accuracy";

/// `InferenceTime` value of failure rows
pub const FAILED_MARKER: &str = "FAILED";

/// One CSV row
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    /// Model file name
    pub model_name: String,
    /// Ground-truth label, empty when unknown
    pub label: String,
    /// Milliseconds, or [`FAILED_MARKER`]
    pub inference_time: String,
    /// Predicted label, or the failure reason
    pub recognition: String,
    /// Probability of the prediction, empty when not applicable
    pub accuracy: String,
}

impl CsvRow {
    /// Row for a timed batch without predictions
    pub fn timing(model_name: &str, duration_ms: f64) -> Self {
        Self {
            model_name: model_name.to_string(),
            label: String::new(),
            inference_time: format!("{duration_ms:.3}"),
            recognition: String::new(),
            accuracy: String::new(),
        }
    }

    /// Row for one ranked prediction
    pub fn prediction(
        model_name: &str,
        ground_truth: Option<&str>,
        duration_ms: f64,
        label: &str,
        probability: f32,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            label: ground_truth.unwrap_or_default().to_string(),
            inference_time: format!("{duration_ms:.3}"),
            recognition: label.to_string(),
            accuracy: format!("{probability:.6}"),
        }
    }

    /// Row for a failed batch
    pub fn failure(model_name: &str, ground_truth: Option<&str>, reason: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            label: ground_truth.unwrap_or_default().to_string(),
            inference_time: FAILED_MARKER.to_string(),
            recognition: reason.to_string(),
            accuracy: String::new(),
        }
    }

    /// Render as one line, without the newline
    pub fn to_line(&self) -> String {
        [
            &self.model_name,
            &self.label,
            &self.inference_time,
            &self.recognition,
            &self.accuracy,
        ]
        .iter()
        .map(|f| escape(f))
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// Quote a field if it holds a comma, quote or line break
pub fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Append-only CSV writer
pub struct CsvSink {
    writer: Box<dyn Write + Send>,
    path: Option<PathBuf>,
    rows: usize,
}

impl std::fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSink")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl CsvSink {
    /// Create (truncate) `path` and write the header
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
        let mut sink = Self {
            writer: Box::new(BufWriter::new(file)),
            path: Some(path.to_path_buf()),
            rows: 0,
        };
        sink.write_line(CSV_HEADER)?;
        tracing::info!("Writing CSV results to {}", path.display());
        Ok(sink)
    }

    /// Wrap any writer and write the header
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be written.
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Result<Self, StoreError> {
        let mut sink = Self {
            writer,
            path: None,
            rows: 0,
        };
        sink.write_line(CSV_HEADER)?;
        Ok(sink)
    }

    /// Append one row
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub fn write_row(&mut self, row: &CsvRow) -> Result<(), StoreError> {
        self.write_line(&row.to_line())?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written, header excluded
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Output path, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush buffered rows
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let target = self.target();
        self.writer.flush().map_err(|e| StoreError::io(target, e))
    }

    fn write_line(&mut self, line: &str) -> Result<(), StoreError> {
        let target = self.target();
        writeln!(self.writer, "{line}").map_err(|e| StoreError::io(target, e))
    }

    fn target(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from("<csv stream>"))
    }
}
