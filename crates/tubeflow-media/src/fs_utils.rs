//! Filesystem helpers for staging media across mount points.

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// EXDEV on Linux and macOS.
const CROSS_DEVICE_ERRNO: i32 = 18;

/// Move `src` to `dst`, creating the destination directory.
///
/// Falls back to copy + rename + delete when the two paths live on different
/// filesystems; the copy goes to a sibling temp name first so `dst` never
/// holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERRNO) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying");
            let partial = dst.with_extension("partial");
            if let Err(e) = fs::copy(src, &partial).await {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&partial, dst).await {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
            if let Err(e) = fs::remove_file(src).await {
                warn!(src = %src.display(), "Failed to remove source after copy: {}", e);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove a file or directory tree, ignoring "not found".
pub async fn remove_quietly(path: impl AsRef<Path>) {
    let path = path.as_ref();
    let result = match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        warn!(path = %path.display(), "Failed to remove: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_move_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("upload.bin");
        let dst = dir.path().join("staging/abc/source.mov");
        fs::write(&src, b"payload").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = move_file(dir.path().join("nope"), dir.path().join("dst")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_quietly_handles_all_cases() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        let tree = dir.path().join("tree/inner");
        fs::write(&file, b"x").await.unwrap();
        fs::create_dir_all(&tree).await.unwrap();

        remove_quietly(&file).await;
        remove_quietly(dir.path().join("tree")).await;
        remove_quietly(dir.path().join("missing")).await;

        assert!(!file.exists());
        assert!(!dir.path().join("tree").exists());
    }
}
