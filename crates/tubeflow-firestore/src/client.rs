//! Firestore REST API client.
//!
//! - Cached service-account tokens, re-fetched once on an expired-token 401
//! - Pooled HTTP client with request and connect timeouts
//! - Retry with jittered backoff on transient failures
//! - `updateTime` preconditions for optimistic concurrency
//! - Tracing spans and request metrics per operation

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::CustomServiceAccount;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::{record_precondition_conflict, record_request};
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::TokenSource;
use crate::types::{Document, RunQueryRequest, RunQueryResponse, StructuredQuery, Value};

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a local emulator; disables service-account auth
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| FirestoreError::auth_error("GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set"))?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error("GCP_PROJECT_ID cannot be empty"));
        }

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID").unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(
                std::env::var("FIRESTORE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST").ok().filter(|h| !h.is_empty()),
        })
    }
}

/// Write precondition for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// Fail unless the document exists
    Exists,
    /// Fail unless the stored document still has this update time
    UpdateTime(String),
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    tokens: Arc<TokenSource>,
}

impl FirestoreClient {
    /// Create a client for production or, when configured, the emulator.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let (root, tokens) = match &config.emulator_host {
            Some(host) => (format!("http://{}", host), TokenSource::fixed("owner")),
            None => {
                let account = CustomServiceAccount::from_env()
                    .map_err(|e| FirestoreError::auth_error(format!("Failed to load service account: {}", e)))?
                    .ok_or_else(|| FirestoreError::auth_error("GOOGLE_APPLICATION_CREDENTIALS not set"))?;
                (
                    "https://firestore.googleapis.com".to_string(),
                    TokenSource::service_account(Arc::new(account)),
                )
            }
        };
        Self::with_endpoint(config, &root, tokens)
    }

    /// Create a client against an explicit endpoint root (emulators, tests).
    pub fn with_endpoint(config: FirestoreConfig, root: &str, tokens: TokenSource) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("tubeflow-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let base_url = format!(
            "{}/v1/projects/{}/databases/{}/documents",
            root.trim_end_matches('/'),
            config.project_id,
            config.database_id
        );

        Ok(Self {
            http,
            config,
            base_url,
            tokens: Arc::new(tokens),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, urlencoding::encode(doc_id))
    }

    /// Get a document, `None` when missing.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<Option<Document>> {
        let url = &self.document_url(collection, doc_id);
        let http = &self.http;

        self.call("get_document", collection, Some(doc_id), move || async move {
            let response = self.send(|token| http.get(url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` when the id is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = &format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = &Document::new(fields);
        let http = &self.http;

        self.call("create_document", collection, Some(doc_id), move || async move {
            let response = self.send(|token| http.post(url).bearer_auth(token).json(body)).await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!("{}/{}", collection, doc_id))),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Replace a document's fields, subject to `precondition`.
    ///
    /// A failed precondition surfaces as `PreconditionFailed` and is not retried.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        precondition: Precondition,
    ) -> FirestoreResult<Document> {
        let mut url = self.document_url(collection, doc_id);
        match &precondition {
            Precondition::None => {}
            Precondition::Exists => url.push_str("?currentDocument.exists=true"),
            Precondition::UpdateTime(ts) => {
                url.push_str(&format!("?currentDocument.updateTime={}", urlencoding::encode(ts)));
            }
        }
        let url = &url;
        let body = &Document::new(fields);
        let http = &self.http;

        self.call("update_document", collection, Some(doc_id), move || async move {
            let response = self.send(|token| http.patch(url).bearer_auth(token).json(body)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    record_precondition_conflict(collection);
                    let text = response.text().await.unwrap_or_default();
                    Err(FirestoreError::PreconditionFailed(text))
                }
                StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!("{}/{}", collection, doc_id))),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Delete a document. Returns whether it existed.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> FirestoreResult<bool> {
        let url = &format!("{}?currentDocument.exists=true", self.document_url(collection, doc_id));
        let http = &self.http;

        self.call("delete_document", collection, Some(doc_id), move || async move {
            let response = self.send(|token| http.delete(url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Run a structured query against top-level collections.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let url = &format!("{}:runQuery", self.base_url);
        let request = &RunQueryRequest {
            structured_query: query,
        };
        let http = &self.http;

        self.call("run_query", "query", None, move || async move {
            let response = self.send(|token| http.post(url).bearer_auth(token).json(request)).await?;
            match response.status() {
                StatusCode::OK => {
                    // runQuery returns an array with one entry per result, plus
                    // a trailing entry with only readTime.
                    let results: Vec<RunQueryResponse> = response.json().await?;
                    Ok(results.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Send a request, re-fetching the token once if the server reports it expired.
    async fn send<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(401, body));
        }
        self.tokens.invalidate().await;
        let token = self.tokens.token().await?;
        Ok(build(&token).send().await?)
    }

    /// Run one operation with retry, a tracing span and request metrics.
    async fn call<T, F, Fut>(&self, operation: &str, collection: &str, doc_id: Option<&str>, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = doc_id.unwrap_or("")
        );

        let start = Instant::now();
        let result = with_retry(&self.config.retry, operation, op).instrument(span).await;
        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_secs_f64() * 1000.0);
        result
    }
}

fn is_access_token_expired(body: &str) -> bool {
    body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
}

async fn error_from_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        if let Some(ms) = retry_after_ms {
            return FirestoreError::RateLimited(ms);
        }
    }
    let body = response.text().await.unwrap_or_default();
    FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use serial_test::serial;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

    fn test_config() -> FirestoreConfig {
        FirestoreConfig {
            project_id: "test-project".to_string(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            emulator_host: None,
        }
    }

    fn client(server: &MockServer) -> FirestoreClient {
        FirestoreClient::with_endpoint(test_config(), &server.uri(), TokenSource::fixed("owner")).unwrap()
    }

    #[test]
    #[serial]
    fn test_config_requires_project() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        assert!(FirestoreConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_reads_emulator_host() {
        std::env::set_var("GCP_PROJECT_ID", "demo");
        std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
        let config = FirestoreConfig::from_env().unwrap();
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIRESTORE_EMULATOR_HOST");

        assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/videos/abc", DOCS)))
            .and(header("authorization", "Bearer owner"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client(&server).get_document("videos", "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_sends_precondition_and_maps_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/videos/abc", DOCS)))
            .and(query_param("currentDocument.updateTime", "2026-01-01T00:00:00.000001Z"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "status": "FAILED_PRECONDITION"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .update_document(
                "videos",
                "abc",
                HashMap::new(),
                Precondition::UpdateTime("2026-01-01T00:00:00.000001Z".into()),
            )
            .await
            .unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[tokio::test]
    async fn test_delete_reports_whether_document_existed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/gemini_keys/u1", DOCS)))
            .and(query_param("currentDocument.exists", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/gemini_keys/u2", DOCS)))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.delete_document("gemini_keys", "u1").await.unwrap());
        assert!(!client.delete_document("gemini_keys", "u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/test-project/databases/(default)/documents/videos/abc",
                "fields": {"status": {"stringValue": "ready"}},
                "updateTime": "2026-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let doc = client(&server).get_document("videos", "abc").await.unwrap().unwrap();
        assert_eq!(doc.doc_id(), Some("abc"));
        assert_eq!(doc.update_time.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_run_query_skips_read_time_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .and(body_partial_json(json!({"structuredQuery": {"from": [{"collectionId": "videos"}]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": {"name": "x/videos/a", "fields": {}}, "readTime": "t"},
                {"readTime": "t"}
            ])))
            .mount(&server)
            .await;

        let docs = client(&server).run_query(StructuredQuery::collection("videos")).await.unwrap();
        assert_eq!(docs.len(), 1);
    }
}
