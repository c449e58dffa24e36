//! Backend selection.

use std::sync::Arc;

use tubeflow_firestore::{FirestoreClient, FirestoreConfig};

use crate::error::{StateError, StateResult};
use crate::firestore::{FirestoreApiKeyStore, FirestoreTokenStore, FirestoreVideoStore};
use crate::memory::{InMemoryApiKeyStore, InMemoryTokenStore, InMemoryVideoStore};
use crate::store::{ApiKeyStore, TokenStore, VideoStore};

/// Which state backend to run against.
#[derive(Debug, Clone, Default)]
pub enum StateConfig {
    /// Process-local maps; state is lost on restart
    #[default]
    Memory,
    Firestore(FirestoreConfig),
}

/// Handles to every store, sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub videos: Arc<dyn VideoStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
}

impl StateConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StateResult<Self> {
        let backend = std::env::var("STATE_BACKEND").unwrap_or_else(|_| "memory".to_string());
        match backend.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "firestore" => Ok(Self::Firestore(FirestoreConfig::from_env()?)),
            other => Err(StateError::Backend(format!("Unknown STATE_BACKEND '{}'", other))),
        }
    }

    /// Connect the configured backend.
    pub async fn build(self) -> StateResult<Stores> {
        match self {
            Self::Memory => Ok(Stores {
                videos: Arc::new(InMemoryVideoStore::new()),
                tokens: Arc::new(InMemoryTokenStore::new()),
                api_keys: Arc::new(InMemoryApiKeyStore::new()),
            }),
            Self::Firestore(config) => {
                let client = FirestoreClient::new(config).await?;
                Ok(Stores {
                    videos: Arc::new(FirestoreVideoStore::new(client.clone())),
                    tokens: Arc::new(FirestoreTokenStore::new(client.clone())),
                    api_keys: Arc::new(FirestoreApiKeyStore::new(client)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_memory_is_the_default_backend() {
        std::env::remove_var("STATE_BACKEND");
        assert!(matches!(StateConfig::from_env().unwrap(), StateConfig::Memory));
    }

    #[test]
    #[serial]
    fn test_unknown_backend_is_rejected() {
        std::env::set_var("STATE_BACKEND", "postgres");
        let result = StateConfig::from_env();
        std::env::remove_var("STATE_BACKEND");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_builds() {
        let stores = StateConfig::Memory.build().await.unwrap();
        assert!(stores.videos.check_health().await.is_ok());
        assert!(stores.tokens.get("nobody").await.unwrap().is_none());
        assert!(stores.api_keys.get("nobody").await.unwrap().is_none());
    }
}
