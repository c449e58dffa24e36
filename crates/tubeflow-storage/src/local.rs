//! Media store on the local filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use tubeflow_models::VideoId;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_id, MediaStore, StoredMedia, VIDEO_FILE_NAME};

/// Stores payloads as `{root}/{video_id}/video.mp4`.
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn video_dir(&self, id: &VideoId) -> StorageResult<PathBuf> {
        Ok(self.root.join(validate_id(id)?))
    }

    fn video_path(&self, id: &VideoId) -> StorageResult<PathBuf> {
        Ok(self.video_dir(id)?.join(VIDEO_FILE_NAME))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn put(&self, id: &VideoId, source: &Path) -> StorageResult<StoredMedia> {
        let dir = self.video_dir(id)?;
        let dest = dir.join(VIDEO_FILE_NAME);
        tokio::fs::create_dir_all(&dir).await?;

        // Copy beside the target and rename so readers never see a half-written file.
        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let copied = match tokio::fs::copy(source, &tmp).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(StorageError::upload_failed(format!(
                    "copy {} failed: {}",
                    source.display(),
                    e
                )));
            }
        };
        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(video_id = %id, path = %dest.display(), size_bytes = copied, "Stored media");
        Ok(StoredMedia {
            location: dest.to_string_lossy().to_string(),
            size_bytes: copied,
        })
    }

    async fn get(&self, id: &VideoId, _scratch_dir: &Path) -> StorageResult<PathBuf> {
        let path = self.video_path(id)?;
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(StorageError::not_found(id.as_str()))
        }
    }

    async fn delete(&self, id: &VideoId) -> StorageResult<bool> {
        let dir = self.video_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(video_id = %id, "Deleted local media");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn stat(&self, id: &VideoId) -> StorageResult<Option<u64>> {
        match tokio::fs::metadata(self.video_path(id)?).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_health(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn fixture(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("normalized.mp4");
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_put_get_stat() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = LocalMediaStore::new(root.path());
        let id = VideoId::new();

        let stored = store.put(&id, &fixture(&work, b"0123456789").await).await.unwrap();
        assert_eq!(stored.size_bytes, 10);

        let path = store.get(&id, work.path()).await.unwrap();
        assert_eq!(path, root.path().join(id.as_str()).join(VIDEO_FILE_NAME));
        assert_eq!(store.stat(&id).await.unwrap(), Some(10));
        assert!(store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_replaces_previous_payload() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = LocalMediaStore::new(root.path());
        let id = VideoId::new();

        store.put(&id, &fixture(&work, b"first").await).await.unwrap();
        store.put(&id, &fixture(&work, b"second!").await).await.unwrap();

        assert_eq!(store.stat(&id).await.unwrap(), Some(7));
        // No temp files left behind.
        let entries = std::fs::read_dir(root.path().join(id.as_str())).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = LocalMediaStore::new(root.path());
        let id = VideoId::new();
        store.put(&id, &fixture(&work, b"data").await).await.unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(!store.exists(&id).await.unwrap());
        assert!(store.get(&id, work.path()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_traversal_ids() {
        let root = TempDir::new().unwrap();
        let store = LocalMediaStore::new(root.path());
        let err = store.stat(&VideoId::from_string("../secrets")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
