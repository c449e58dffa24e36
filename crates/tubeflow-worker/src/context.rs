//! Collaborators shared by every pipeline step.

use std::sync::Arc;

use tracing::info;
use tubeflow_ai::{ContentGenerator, GeminiClient, GeminiSpeechToText};
use tubeflow_media::{FfmpegTranscoder, MediaConfig, SourcePolicy, Transcoder};
use tubeflow_publisher::{GoogleOAuthClient, PublisherConfig, TokenManager, VideoPlatform, YouTubeClient};
use tubeflow_state::{ApiKeyStore, StateConfig, TokenStore, VideoStore};
use tubeflow_storage::{MediaStore, StorageConfig};

use crate::error::{WorkerError, WorkerResult};

/// Everything the orchestrator and cleanup scheduler talk to.
///
/// Built once per process and passed in explicitly; tests assemble one from
/// in-memory stores and fakes.
#[derive(Clone)]
pub struct PipelineContext {
    pub videos: Arc<dyn VideoStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub media: Arc<dyn MediaStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub generator: Arc<dyn ContentGenerator>,
    pub platform: Arc<dyn VideoPlatform>,
    pub token_manager: Arc<TokenManager>,
    pub source_policy: SourcePolicy,
}

/// Production wiring plus the OAuth client the HTTP layer needs for code
/// exchange.
pub struct Services {
    pub context: PipelineContext,
    pub oauth: Arc<GoogleOAuthClient>,
}

impl Services {
    /// Build every backend from environment variables.
    pub async fn from_env() -> WorkerResult<Self> {
        let stores = StateConfig::from_env()?.build().await?;
        let media = StorageConfig::from_env()?.build();

        let media_config = MediaConfig::from_env();
        let source_policy = SourcePolicy::new().allow_private_networks(media_config.allow_private_sources);

        let gemini = GeminiClient::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?;
        let speech = Arc::new(GeminiSpeechToText::new(gemini.clone()));
        let transcoder = Arc::new(FfmpegTranscoder::new(media_config, speech)?);

        let publisher_config = PublisherConfig::from_env();
        let oauth = Arc::new(
            GoogleOAuthClient::new(publisher_config.clone()).map_err(|e| WorkerError::config_error(e.to_string()))?,
        );
        let token_manager = Arc::new(TokenManager::new(
            Arc::clone(&stores.tokens),
            oauth.clone(),
            publisher_config.refresh_margin,
        ));
        let platform = Arc::new(YouTubeClient::new(publisher_config)?);

        info!(model = %gemini.config().model, "Pipeline services initialised");

        Ok(Self {
            context: PipelineContext {
                videos: stores.videos,
                tokens: stores.tokens,
                api_keys: stores.api_keys,
                media,
                transcoder,
                generator: Arc::new(gemini),
                platform,
                token_manager,
                source_policy,
            },
            oauth,
        })
    }
}
