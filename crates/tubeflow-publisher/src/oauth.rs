//! Google OAuth token endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::PublisherConfig;
use crate::error::{PublishError, PublishResult};

/// A successful token endpoint reply.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Only sent on code exchange, or when the provider rotates it
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorReply {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> PublishResult<TokenGrant>;
}

/// OAuth client for Google's token endpoint.
#[derive(Clone)]
pub struct GoogleOAuthClient {
    http: Client,
    config: PublisherConfig,
}

impl GoogleOAuthClient {
    pub fn new(config: PublisherConfig) -> PublishResult<Self> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(PublishError::config("GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET must be set"));
        }
        let http = Client::builder().timeout(config.oauth_timeout).build()?;
        Ok(Self { http, config })
    }

    /// Trade an authorization code from the consent redirect for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> PublishResult<TokenGrant> {
        let grant = self
            .post_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ])
            .await?;
        if grant.refresh_token.as_deref().map_or(true, str::is_empty) {
            return Err(PublishError::refresh_failed(
                "Authorization did not return a refresh token; request offline access with consent",
                true,
            ));
        }
        Ok(grant)
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> PublishResult<TokenGrant> {
        let response = self
            .http
            .post(&self.config.token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| PublishError::refresh_failed(format!("Token endpoint unreachable: {}", e), false))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| PublishError::refresh_failed(format!("Malformed token reply: {}", e), false));
        }

        let body = response.text().await.unwrap_or_default();
        let reply: Option<TokenErrorReply> = serde_json::from_str(&body).ok();
        let (code, description) = match &reply {
            Some(r) => (r.error.as_str(), r.error_description.as_deref().unwrap_or_default()),
            None => ("", body.as_str()),
        };

        // invalid_grant: the refresh token was revoked, expired or already used.
        let revoked = (status == StatusCode::BAD_REQUEST && code == "invalid_grant") || status == StatusCode::UNAUTHORIZED;
        warn!(status = %status, error = code, revoked, "Token endpoint rejected request");
        Err(PublishError::refresh_failed(
            format!("{} {}: {}", status.as_u16(), code, description),
            revoked,
        ))
    }
}

#[async_trait]
impl TokenRefresher for GoogleOAuthClient {
    async fn refresh(&self, refresh_token: &str) -> PublishResult<TokenGrant> {
        debug!("Refreshing YouTube access token");
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> GoogleOAuthClient {
        GoogleOAuthClient::new(PublisherConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            token_uri: format!("{}/token", server.uri()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_client_credentials() {
        assert!(matches!(
            GoogleOAuthClient::new(PublisherConfig::default()),
            Err(PublishError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client(&server).refresh("r1").await.unwrap();
        assert_eq!(grant.access_token, "a2");
        assert_eq!(grant.expires_in, 3599);
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let err = client(&server).refresh("r1").await.unwrap_err();
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_server_error_does_not_demand_reauthorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).refresh("r1").await.unwrap_err();
        assert!(matches!(err, PublishError::TokenRefreshFailed { revoked: false, .. }));
    }

    #[tokio::test]
    async fn test_exchange_code_requires_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .exchange_code("code-1", "https://app.example/callback")
            .await
            .unwrap_err();
        assert!(err.requires_reauthorization());
    }
}
