// SPDX-License-Identifier: AGPL-3.0-only

//! Read-only memory-mapped model files
//!
//! Models are mapped rather than read so that large files cost no copy at
//! load time. Unsafe code is confined to this module.

use crate::error::{EngineError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::ops::Deref;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// A model file mapped read-only into memory
#[derive(Debug)]
pub struct MappedModel {
    ptr: NonNull<u8>,
    len: usize,
    _file: File,
    path: PathBuf,
}

impl MappedModel {
    /// Map a model file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file does not exist
    /// - The file is empty
    /// - mmap fails
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(EngineError::model_not_found(path));
        }

        let file = File::open(path)?;

        // Model files fit in usize on every supported target
        #[allow(clippy::cast_possible_truncation)]
        let len = file.metadata()?.len() as usize;

        if len == 0 {
            return Err(EngineError::invalid_model(format!(
                "{} is empty",
                path.display()
            )));
        }

        // SAFETY: the descriptor was just opened for reading, `len` is the
        // non-zero file size, the mapping is private and read-only, and the
        // file is kept open for the lifetime of the mapping. Drop unmaps
        // with the same length.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ,
                MapFlags::PRIVATE,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| EngineError::invalid_model(format!("mmap {} failed: {e}", path.display())))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| EngineError::invalid_model("mmap returned a null mapping"))?;

        tracing::debug!("Mapped {} ({len} bytes)", path.display());

        Ok(Self {
            ptr,
            len,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the mapped file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Mapped bytes
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live read-only mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Deref for MappedModel {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Drop for MappedModel {
    fn drop(&mut self) {
        // SAFETY: ptr and len come from the successful mmap in open().
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.len) {
                tracing::error!("munmap of {} failed: {e}", self.path.display());
            }
        }
    }
}

// SAFETY: the mapping is private and read-only; no interior mutation exists,
// so moving or sharing it across threads cannot race.
unsafe impl Send for MappedModel {}

// SAFETY: see Send; all access is through &[u8].
unsafe impl Sync for MappedModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_maps_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"EBM1-model-bytes").unwrap();

        let mapped = MappedModel::open(file.path()).unwrap();
        assert_eq!(&mapped[..], b"EBM1-model-bytes");
        assert_eq!(mapped.len(), 16);
    }

    #[test]
    fn test_missing_file() {
        let err = MappedModel::open("/nonexistent/model.tflite").unwrap_err();
        assert!(matches!(err, EngineError::ModelNotFound { .. }));
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = MappedModel::open(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidModel { .. }));
    }
}
