//! X platform implementation
//!
//! Talks to the X v2 API over HTTP: the OAuth2 refresh grant and the tweet
//! creation endpoint. Every request carries the configured timeout so a hung
//! call cannot stall a dispatch pass.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::platform::{Platform, RefreshedCredentials};

/// Fallback when the provider omits `expires_in` from a token response
const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

pub struct XPlatform {
    http: reqwest::Client,
    api_base_url: String,
    auth_base_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

impl XPlatform {
    /// Create a new X client from configuration
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Network` if the HTTP client cannot be built.
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_base_url: config.auth_base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl Platform for XPlatform {
    async fn refresh_credentials(&self, refresh_token: &str) -> Result<RefreshedCredentials> {
        let url = format!("{}/2/oauth2/token", self.auth_base_url);

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| map_transport_error(e, "refresh token"))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, retry_after, &body, "refresh token").into());
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            PlatformError::Posting(format!("Malformed token response (refresh token): {}", e))
        })?;

        debug!("Refreshed X credentials");

        Ok(RefreshedCredentials {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in_secs: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        })
    }

    async fn publish(&self, access_token: &str, content: &str) -> Result<String> {
        let url = format!("{}/2/tweets", self.api_base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "text": content }))
            .send()
            .await
            .map_err(|e| map_transport_error(e, "publish"))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, retry_after, &body, "publish").into());
        }

        let tweet: TweetResponse = response.json().await.map_err(|e| {
            PlatformError::Posting(format!("Malformed publish response: {}", e))
        })?;

        debug!(post_id = %tweet.data.id, "Published to X");

        Ok(tweet.data.id)
    }

    fn name(&self) -> &str {
        "x"
    }
}

/// Read a Retry-After header as whole seconds, if present
fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Map a reqwest transport error to a PlatformError
///
/// Timeouts and connection failures are transient network problems.
fn map_transport_error(error: reqwest::Error, context: &str) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Network(format!("X request timed out ({})", context))
    } else {
        PlatformError::Network(format!("X request failed ({}): {}", context, error))
    }
}

/// Map an HTTP error response to a PlatformError
///
/// Classification:
/// - 401/403, or a body reporting unsupported authentication -> `Authentication`
/// - 422 -> `Validation`
/// - 429 -> `RateLimit` (with the Retry-After hint when supplied)
/// - 5xx -> `Network`
/// - any other status -> `Posting`
fn map_http_error(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
    context: &str,
) -> PlatformError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return PlatformError::Authentication(format!(
            "X rejected credentials ({}): {} {}",
            context, status, body
        ));
    }

    if body.to_lowercase().contains("unsupported authentication") {
        return PlatformError::Authentication(format!(
            "X reported unsupported authentication ({}): {}",
            context, body
        ));
    }

    match status.as_u16() {
        422 => PlatformError::Validation(format!("X rejected content ({}): {}", context, body)),
        429 => PlatformError::RateLimit {
            message: format!("X rate limit hit ({})", context),
            retry_after_secs,
        },
        500..=599 => {
            PlatformError::Network(format!("X server error ({}): {} {}", context, status, body))
        }
        _ => PlatformError::Posting(format!("X error ({}): {} {}", context, status, body)),
    }
}
