//! Publishing with bounded retry
//!
//! The publisher performs one logical publish: make the credentials valid,
//! then attempt the platform call up to the policy's attempt cap, backing off
//! between transient failures. Authorization-class failures stop immediately
//! and are reported as unrecoverable. Status write-back is the dispatcher's
//! job, not the publisher's.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{PlatformError, XcastError};
use crate::platform::Platform;
use crate::tokens::TokenManager;
use crate::types::Credentials;

/// Retry behavior for transient publish failures
///
/// Injected into the [`Publisher`] so retry semantics are testable in
/// isolation with a fast policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear backoff step when the provider gives no retry hint
    pub base_delay: Duration,
    /// Floor applied to provider retry-after hints
    pub min_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            min_retry_after: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    ///
    /// A provider retry-after hint is honored with the configured floor;
    /// otherwise backoff grows linearly with the attempt number.
    pub fn backoff_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        match retry_after_secs {
            Some(secs) => Duration::from_secs(secs).max(self.min_retry_after),
            None => self.base_delay * attempt,
        }
    }
}

/// Outcome of a failed publish
#[derive(Debug)]
pub struct PublishError {
    pub error: XcastError,
    /// True for authorization-class failures: the owning user's credential is
    /// presumed unusable until re-authorization, so nothing should retry
    pub unrecoverable: bool,
    /// Platform publish calls actually made (0 when refresh already failed)
    pub attempts: u32,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Check if an error is transient and should be retried
///
/// Only authentication failures are permanent; everything else (network,
/// rate limiting, provider hiccups) is worth another attempt.
fn is_transient_error(error: &XcastError) -> bool {
    match error {
        XcastError::Platform(platform_error) => {
            !matches!(platform_error, PlatformError::Authentication(_))
        }
        _ => false,
    }
}

/// Extract the provider's retry-after hint, if the error carries one
fn retry_after_hint(error: &XcastError) -> Option<u64> {
    match error {
        XcastError::Platform(PlatformError::RateLimit {
            retry_after_secs, ..
        }) => *retry_after_secs,
        _ => None,
    }
}

/// Publishes content for a user through valid credentials
#[derive(Clone)]
pub struct Publisher {
    platform: Arc<dyn Platform>,
    tokens: TokenManager,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(platform: Arc<dyn Platform>, tokens: TokenManager) -> Self {
        Self {
            platform,
            tokens,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Publish `content` on behalf of `user_id`
    ///
    /// Credentials are validated (and refreshed) first; the refreshed copy is
    /// written back through `credentials` so callers processing several posts
    /// for one user reuse it without another refresh. Returns the platform
    /// post id on success.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] with `unrecoverable: true` when the refresh
    /// failed or the platform rejected the credentials, and with
    /// `unrecoverable: false` when all attempts failed transiently.
    pub async fn publish(
        &self,
        user_id: &str,
        credentials: &mut Credentials,
        content: &str,
    ) -> std::result::Result<String, PublishError> {
        let valid = match self.tokens.ensure_valid(user_id, credentials).await {
            Ok(valid) => valid,
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "Credential refresh failed, not retrying");
                return Err(PublishError {
                    error,
                    unrecoverable: true,
                    attempts: 0,
                });
            }
        };
        *credentials = valid;

        let Some(access_token) = credentials.access_token.clone() else {
            return Err(PublishError {
                error: PlatformError::Authentication(
                    "No access token available after refresh".to_string(),
                )
                .into(),
                unrecoverable: true,
                attempts: 0,
            });
        };

        let max_attempts = self.policy.max_attempts;
        let mut last_error: Option<XcastError> = None;

        for attempt in 1..=max_attempts {
            match self.platform.publish(&access_token, content).await {
                Ok(post_id) => {
                    if attempt > 1 {
                        info!(user_id = %user_id, attempt, "Publish succeeded after retry");
                    }
                    return Ok(post_id);
                }
                Err(error) => {
                    if !is_transient_error(&error) {
                        warn!(user_id = %user_id, error = %error, "Unrecoverable publish failure");
                        return Err(PublishError {
                            error,
                            unrecoverable: true,
                            attempts: attempt,
                        });
                    }

                    if attempt < max_attempts {
                        let delay = self.policy.backoff_delay(attempt, retry_after_hint(&error));
                        warn!(
                            user_id = %user_id,
                            attempt,
                            max_attempts,
                            error = %error,
                            "Transient publish failure, retrying in {:?}",
                            delay
                        );
                        sleep(delay).await;
                    } else {
                        warn!(
                            user_id = %user_id,
                            max_attempts,
                            error = %error,
                            "Publish failed after exhausting attempts"
                        );
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(PublishError {
            error: last_error.unwrap_or_else(|| {
                PlatformError::Posting(format!("Publish failed after {} attempts", max_attempts))
                    .into()
            }),
            unrecoverable: false,
            attempts: max_attempts,
        })
    }
}
