//! Application state.

use std::sync::Arc;

use tracing::{info, warn};
use tubeflow_publisher::GoogleOAuthClient;
use tubeflow_worker::{CleanupScheduler, Orchestrator, PipelineContext, Services, WorkerConfig};

use crate::auth::{Authenticator, JwksCache};
use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub cleanup: Arc<CleanupScheduler>,
    pub oauth: Arc<GoogleOAuthClient>,
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        orchestrator: Arc<Orchestrator>,
        oauth: Arc<GoogleOAuthClient>,
        auth: Arc<Authenticator>,
    ) -> Self {
        let cleanup = Arc::new(CleanupScheduler::new(orchestrator.context(), orchestrator.config()));
        Self {
            config,
            orchestrator,
            cleanup,
            oauth,
            auth,
        }
    }

    /// Build every backend from environment variables.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let services = Services::from_env().await?;
        let worker_config = WorkerConfig::from_env();
        info!("Worker config: {:?}", worker_config);

        let firebase = config
            .firebase_project_id
            .as_deref()
            .map(JwksCache::new)
            .transpose()?;
        let auth = Authenticator::new(firebase, config.auth_jwt_secret.as_deref());
        if !auth.is_configured() {
            warn!("Neither FIREBASE_PROJECT_ID nor AUTH_JWT_SECRET is set; every API call will be rejected");
        }

        let orchestrator = Arc::new(Orchestrator::new(services.context, worker_config));
        Ok(Self::new(config, orchestrator, services.oauth, Arc::new(auth)))
    }

    pub fn context(&self) -> &PipelineContext {
        self.orchestrator.context()
    }
}
