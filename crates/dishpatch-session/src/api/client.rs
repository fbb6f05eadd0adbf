//! Token endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ApiError;

/// HTTP request timeout in seconds.
/// A hung refresh must fail eventually so guards can escalate.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

/// Body of a successful `/token/refresh/` response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RefreshedTokens {
    pub access: String,
    /// Present when the server rotated the refresh token
    #[serde(default)]
    pub refresh: Option<String>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("rotated", &self.refresh.is_some())
            .finish_non_exhaustive()
    }
}

/// Remote operations on tokens.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError>;

    /// Ask the server whether `token` is valid.
    async fn verify(&self, token: &str) -> Result<bool, ApiError>;
}

/// Check if response is successful, returning an error with body if not.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

/// reqwest-backed token endpoint client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct TokenApi {
    client: Client,
    base_url: String,
}

impl TokenApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build on an existing client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl TokenEndpoint for TokenApi {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
        let url = self.endpoint("token/refresh/");
        debug!(url = %url, "Requesting token refresh");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;
        let response = check_response(response).await?;

        let tokens: RefreshedTokens = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e)))?;
        if tokens.access.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Refresh response carried an empty access token".to_string(),
            ));
        }
        Ok(tokens)
    }

    async fn verify(&self, token: &str) -> Result<bool, ApiError> {
        let url = self.endpoint("token/verify/");
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&VerifyRequest { token })
            .send()
            .await?;
        debug!(status = %response.status(), "Token verify response");
        Ok(response.status().is_success())
    }
}
