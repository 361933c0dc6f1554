//! # Upload Ingestion
//!
//! Materializes an uploaded, in-memory payload into an addressable local
//! file for the duration of one request. The file is removed on every exit
//! path: the guard deletes it on drop, tolerating the case where it is
//! already gone.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// A request-scoped temporary audio file, deleted when the guard drops.
pub struct ScopedUpload {
    path: PathBuf,
}

impl ScopedUpload {
    /// Write `bytes` under `spool_dir` with a unique name, keeping the
    /// upload's original extension so downstream decoders can sniff the
    /// container type.
    pub fn materialize(
        bytes: &[u8],
        spool_dir: &Path,
        original_name: Option<&str>,
    ) -> AppResult<Self> {
        let extension = original_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .unwrap_or("wav");
        let path = spool_dir.join(format!("upload-{}.{}", Uuid::new_v4(), extension));

        fs::write(&path, bytes)
            .map_err(|e| AppError::Internal(format!("failed to spool upload: {}", e)))?;
        debug!(path = %path.display(), size = bytes.len(), "Upload materialized");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedUpload {
    fn drop(&mut self) {
        // already-removed is fine
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let upload =
                ScopedUpload::materialize(b"RIFF....", dir.path(), Some("take.wav")).unwrap();
            assert!(upload.path().exists());
            assert_eq!(upload.path().extension().unwrap(), "wav");
            upload.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_upload_tolerates_early_removal() {
        let dir = tempfile::tempdir().unwrap();
        let upload = ScopedUpload::materialize(b"data", dir.path(), None).unwrap();
        fs::remove_file(upload.path()).unwrap();
        // drop must not panic on the missing file
    }

    #[test]
    fn test_default_extension() {
        let dir = tempfile::tempdir().unwrap();
        let upload = ScopedUpload::materialize(b"data", dir.path(), Some("noext")).unwrap();
        assert_eq!(upload.path().extension().unwrap(), "wav");
    }
}
