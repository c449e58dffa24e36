//! The media store seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tubeflow_models::VideoId;

use crate::error::{StorageError, StorageResult};

/// File name every backend stores the normalized video under.
pub const VIDEO_FILE_NAME: &str = "video.mp4";

/// Where a put landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    /// Backend-specific location (filesystem path or object key)
    pub location: String,
    pub size_bytes: u64,
}

/// Durable storage for processed video payloads, keyed by video id.
///
/// Only the payload lives here; the `Video` record stays in the state store.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Copy `source` into the store, replacing any previous payload for `id`.
    async fn put(&self, id: &VideoId, source: &Path) -> StorageResult<StoredMedia>;

    /// Return a local path holding the payload, downloading into `scratch_dir`
    /// when the backend is remote.
    async fn get(&self, id: &VideoId, scratch_dir: &Path) -> StorageResult<PathBuf>;

    /// Delete the payload. Returns whether anything was removed; deleting a
    /// missing payload is not an error.
    async fn delete(&self, id: &VideoId) -> StorageResult<bool>;

    /// Size of the stored payload, if present.
    async fn stat(&self, id: &VideoId) -> StorageResult<Option<u64>>;

    async fn exists(&self, id: &VideoId) -> StorageResult<bool> {
        Ok(self.stat(id).await?.is_some())
    }

    /// Cheap reachability check used by readiness probes.
    async fn check_health(&self) -> StorageResult<()>;
}

/// Reject ids that could escape the content root or form odd object keys.
pub(crate) fn validate_id(id: &VideoId) -> StorageResult<&str> {
    let raw = id.as_str();
    let valid = !raw.is_empty()
        && raw.len() <= 128
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(raw)
    } else {
        Err(StorageError::InvalidKey(raw.to_string()))
    }
}
