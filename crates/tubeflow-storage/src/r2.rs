//! Media store on Cloudflare R2 (S3 API).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tubeflow_models::VideoId;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_id, MediaStore, StoredMedia, VIDEO_FILE_NAME};

/// Key prefix for video payloads.
const VIDEO_PREFIX: &str = "videos";

/// Configuration for the R2 backend.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    ///
    /// `R2_ENDPOINT_URL` wins; otherwise the endpoint is derived from `R2_ACCOUNT_ID`.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint_url = match std::env::var("R2_ENDPOINT_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => {
                let account = std::env::var("R2_ACCOUNT_ID")
                    .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL or R2_ACCOUNT_ID must be set"))?;
                format!("https://{}.r2.cloudflarestorage.com", account)
            }
        };

        Ok(Self {
            endpoint_url,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Object key for a video payload.
pub fn video_key(id: &VideoId) -> StorageResult<String> {
    Ok(format!("{}/{}/{}", VIDEO_PREFIX, validate_id(id)?, VIDEO_FILE_NAME))
}

fn is_missing(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound")
}

/// R2-backed media store.
#[derive(Clone)]
pub struct R2MediaStore {
    client: Client,
    bucket: String,
}

impl R2MediaStore {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }
}

#[async_trait]
impl MediaStore for R2MediaStore {
    async fn put(&self, id: &VideoId, source: &Path) -> StorageResult<StoredMedia> {
        let key = video_key(id)?;
        let size_bytes = tokio::fs::metadata(source).await?.len();
        debug!(video_id = %id, "Uploading {} to {}", source.display(), key);

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type("video/mp4")
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(video_id = %id, key = %key, size_bytes, "Stored media in R2");
        Ok(StoredMedia {
            location: key,
            size_bytes,
        })
    }

    async fn get(&self, id: &VideoId, scratch_dir: &Path) -> StorageResult<PathBuf> {
        let key = video_key(id)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if is_missing(&e.to_string()) {
                    StorageError::not_found(id.as_str())
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        tokio::fs::create_dir_all(scratch_dir).await?;
        let path = scratch_dir.join(format!("{}.mp4", id));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut body = response.body;

        let streamed: StorageResult<()> = async {
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| StorageError::download_failed(e.to_string()))?
            {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = streamed {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        debug!(video_id = %id, "Downloaded {} to {}", key, path.display());
        Ok(path)
    }

    async fn delete(&self, id: &VideoId) -> StorageResult<bool> {
        // S3 deletes succeed for missing keys, so look first to report accurately.
        let existed = self.stat(id).await?.is_some();
        if !existed {
            return Ok(false);
        }

        let key = video_key(id)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!(video_id = %id, key = %key, "Deleted media from R2");
        Ok(true)
    }

    async fn stat(&self, id: &VideoId) -> StorageResult<Option<u64>> {
        let key = video_key(id)?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(e) => {
                let message = e.to_string();
                if is_missing(&message) {
                    Ok(None)
                } else {
                    Err(StorageError::Backend(message))
                }
            }
        }
    }

    async fn check_health(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_video_key_layout() {
        let id = VideoId::from_string("abc123");
        assert_eq!(video_key(&id).unwrap(), "videos/abc123/video.mp4");
        assert!(video_key(&VideoId::from_string("a/../b")).is_err());
    }

    #[test]
    #[serial]
    fn test_endpoint_derived_from_account() {
        std::env::remove_var("R2_ENDPOINT_URL");
        std::env::set_var("R2_ACCOUNT_ID", "acct42");
        std::env::set_var("R2_ACCESS_KEY_ID", "key");
        std::env::set_var("R2_SECRET_ACCESS_KEY", "secret");
        std::env::set_var("R2_BUCKET_NAME", "media");

        let config = R2Config::from_env().unwrap();

        for var in ["R2_ACCOUNT_ID", "R2_ACCESS_KEY_ID", "R2_SECRET_ACCESS_KEY", "R2_BUCKET_NAME"] {
            std::env::remove_var(var);
        }
        assert_eq!(config.endpoint_url, "https://acct42.r2.cloudflarestorage.com");
        assert_eq!(config.region, "auto");
    }
}
