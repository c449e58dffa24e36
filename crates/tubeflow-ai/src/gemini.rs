//! Gemini `generateContent` client with bounded retry.

use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::error::{AiError, AiResult};

/// Gemini API request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: &'a [Part],
}

/// One piece of prompt input.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Base64-encoded binary input.
    pub fn inline(mime_type: impl Into<String>, data: String) -> Self {
        Part::Inline {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> AiResult<Self> {
        if config.api_key.is_empty() {
            return Err(AiError::config("Gemini API key is empty"));
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> AiResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Send `parts` and parse the JSON reply as `T`.
    ///
    /// Text input over `max_input_chars` is refused without calling the
    /// service. Transient failures are retried with exponential backoff up to
    /// `max_attempts`; anything else is returned on the first occurrence.
    pub async fn generate_json<T: DeserializeOwned>(&self, operation: &str, parts: &[Part]) -> AiResult<T> {
        self.generate_json_with_key(operation, parts, None).await
    }

    /// Like [`generate_json`](Self::generate_json), billed to `api_key` when
    /// given instead of the configured key.
    pub async fn generate_json_with_key<T: DeserializeOwned>(
        &self,
        operation: &str,
        parts: &[Part],
        api_key: Option<&str>,
    ) -> AiResult<T> {
        let input_chars: usize = parts
            .iter()
            .map(|p| match p {
                Part::Text { text } => text.chars().count(),
                Part::Inline { .. } => 0,
            })
            .sum();
        if input_chars > self.config.max_input_chars {
            return Err(AiError::invalid_input(format!(
                "Prompt is {} characters, limit is {}",
                input_chars, self.config.max_input_chars
            )));
        }

        let request = GeminiRequest {
            contents: [Content { parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.5,
            },
        };

        let mut attempt = 1u32;
        loop {
            let started = Instant::now();
            let result = self.call_once(&request, api_key).await.and_then(|text| {
                serde_json::from_str::<T>(strip_code_fence(&text))
                    .map_err(|e| AiError::invalid_response(format!("Failed to parse JSON reply: {}", e)))
            });
            record_call(operation, &result, started.elapsed());

            match result {
                Ok(value) => {
                    debug!(operation, attempt, model = %self.config.model, "Gemini call succeeded");
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.retry_delay(attempt, &e);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient Gemini failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    info!(operation, attempt, transient = e.is_transient(), "Gemini call failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn call_once(&self, request: &GeminiRequest<'_>, api_key: Option<&str>) -> AiResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key.unwrap_or(&self.config.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AiError::Timeout } else { AiError::Network(e) })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::from_status(status.as_u16(), message, retry_after));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AiError::invalid_response(format!("Failed to parse Gemini response: {}", e)))?;

        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AiError::invalid_input(format!("Prompt blocked: {}", reason)));
        }

        body.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text.filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| AiError::invalid_response("No content in Gemini response"))
    }

    fn retry_delay(&self, attempt: u32, error: &AiError) -> Duration {
        let backoff = self
            .config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt - 1));
        let delay = match error {
            AiError::RateLimited {
                retry_after: Some(after),
            } => backoff.max(*after),
            _ => backoff,
        };
        delay.min(self.config.max_retry_delay)
    }
}

/// Drop a surrounding markdown code fence, if any.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn record_call<T>(operation: &str, result: &AiResult<T>, elapsed: Duration) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) if e.is_transient() => "transient_error",
        Err(_) => "error",
    };
    metrics::counter!(
        "tubeflow_ai_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("tubeflow_ai_request_duration_seconds", "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}
