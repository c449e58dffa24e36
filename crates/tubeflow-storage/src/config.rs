//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::local::LocalMediaStore;
use crate::r2::{R2Config, R2MediaStore};
use crate::store::MediaStore;

/// Which media backend to run against.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { root: PathBuf },
    R2(R2Config),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("/tmp/tubeflow/content"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = std::env::var("MEDIA_BACKEND").unwrap_or_else(|_| "local".to_string());
        match backend.to_lowercase().as_str() {
            "local" => Ok(Self::Local {
                root: std::env::var("CONTENT_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp/tubeflow/content")),
            }),
            "r2" => Ok(Self::R2(R2Config::from_env()?)),
            other => Err(StorageError::config_error(format!("Unknown MEDIA_BACKEND '{}'", other))),
        }
    }

    /// Build the configured store.
    pub fn build(self) -> Arc<dyn MediaStore> {
        match self {
            Self::Local { root } => Arc::new(LocalMediaStore::new(root)),
            Self::R2(config) => Arc::new(R2MediaStore::new(config)),
        }
    }
}
