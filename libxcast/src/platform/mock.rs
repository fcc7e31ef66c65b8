//! Mock platform implementation for testing
//!
//! A configurable stand-in for the X API that can simulate refresh and
//! publish successes, scripted failure sequences, and network latency. Used
//! by unit and integration tests to exercise the publish pipeline without
//! credentials or network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platform::{Platform, RefreshedCredentials};

/// Mock platform for testing
pub struct MockPlatform {
    name: String,

    /// Error to return from refresh, if any
    refresh_error: Option<PlatformError>,
    /// Whether refresh responses include a rotated refresh token
    rotate_refresh_token: bool,
    /// Relative expiry reported by refresh responses
    expires_in_secs: i64,

    /// Errors emitted by successive publish calls before succeeding.
    /// Once drained, publishes succeed.
    publish_failures: Mutex<VecDeque<PlatformError>>,
    /// If set, every publish fails with this error
    publish_always_fails: Option<PlatformError>,

    /// Delay before completing operations (simulates network latency)
    delay: Duration,

    refresh_call_count: Arc<Mutex<usize>>,
    publish_call_count: Arc<Mutex<usize>>,
    /// (access_token, content) pairs for each successful or attempted publish
    published: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockPlatform {
    fn base(name: &str) -> Self {
        Self {
            name: name.to_string(),
            refresh_error: None,
            rotate_refresh_token: true,
            expires_in_secs: 7200,
            publish_failures: Mutex::new(VecDeque::new()),
            publish_always_fails: None,
            delay: Duration::from_millis(0),
            refresh_call_count: Arc::new(Mutex::new(0)),
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A platform where refresh and publish always succeed
    pub fn success(name: &str) -> Self {
        Self::base(name)
    }

    /// A platform whose refresh grant always fails
    pub fn refresh_failure(name: &str, error: &str) -> Self {
        Self {
            refresh_error: Some(PlatformError::Authentication(error.to_string())),
            ..Self::base(name)
        }
    }

    /// A platform whose publishes always fail with the given error
    pub fn publish_failure(name: &str, error: PlatformError) -> Self {
        Self {
            publish_always_fails: Some(error),
            ..Self::base(name)
        }
    }

    /// A platform that fails each publish with the scripted errors, in order,
    /// then succeeds once the script is drained
    pub fn failing_then_success(name: &str, errors: Vec<PlatformError>) -> Self {
        Self {
            publish_failures: Mutex::new(errors.into()),
            ..Self::base(name)
        }
    }

    /// A platform whose refresh responses omit the rotated refresh token
    pub fn without_token_rotation(mut self) -> Self {
        self.rotate_refresh_token = false;
        self
    }

    /// Override the relative expiry reported by refresh responses
    pub fn with_expires_in(mut self, secs: i64) -> Self {
        self.expires_in_secs = secs;
        self
    }

    /// Add a delay before completing operations
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn refresh_call_count(&self) -> usize {
        *self.refresh_call_count.lock().unwrap()
    }

    pub fn publish_call_count(&self) -> usize {
        *self.publish_call_count.lock().unwrap()
    }

    /// All (access_token, content) pairs that reached a successful publish
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn refresh_credentials(&self, _refresh_token: &str) -> Result<RefreshedCredentials> {
        let call = {
            let mut count = self.refresh_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(error) = &self.refresh_error {
            return Err(error.clone().into());
        }

        Ok(RefreshedCredentials {
            access_token: format!("{}-access-{}", self.name, call),
            refresh_token: self
                .rotate_refresh_token
                .then(|| format!("{}-refresh-{}", self.name, call)),
            expires_in_secs: self.expires_in_secs,
        })
    }

    async fn publish(&self, access_token: &str, content: &str) -> Result<String> {
        *self.publish_call_count.lock().unwrap() += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(error) = &self.publish_always_fails {
            return Err(error.clone().into());
        }

        if let Some(error) = self.publish_failures.lock().unwrap().pop_front() {
            return Err(error.into());
        }

        self.published
            .lock()
            .unwrap()
            .push((access_token.to_string(), content.to_string()));

        Ok(format!("{}:mock-{}", self.name, uuid::Uuid::new_v4()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_success() {
        let platform = MockPlatform::success("test");

        let post_id = platform.publish("token", "Test content").await.unwrap();
        assert!(post_id.starts_with("test:mock-"));
        assert_eq!(platform.publish_call_count(), 1);

        let published = platform.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], ("token".to_string(), "Test content".to_string()));
    }

    #[tokio::test]
    async fn test_mock_refresh_rotates_tokens() {
        let platform = MockPlatform::success("test");

        let refreshed = platform.refresh_credentials("old").await.unwrap();
        assert_eq!(refreshed.access_token, "test-access-1");
        assert_eq!(refreshed.refresh_token, Some("test-refresh-1".to_string()));
        assert_eq!(refreshed.expires_in_secs, 7200);
        assert_eq!(platform.refresh_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_refresh_without_rotation() {
        let platform = MockPlatform::success("test").without_token_rotation();

        let refreshed = platform.refresh_credentials("old").await.unwrap();
        assert_eq!(refreshed.refresh_token, None);
    }

    #[tokio::test]
    async fn test_mock_refresh_failure() {
        let platform = MockPlatform::refresh_failure("test", "revoked");

        let result = platform.refresh_credentials("old").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("revoked"));
        assert_eq!(platform.refresh_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failing_then_success() {
        let platform = MockPlatform::failing_then_success(
            "test",
            vec![
                PlatformError::Network("down".to_string()),
                PlatformError::Network("still down".to_string()),
            ],
        );

        assert!(platform.publish("t", "c").await.is_err());
        assert!(platform.publish("t", "c").await.is_err());
        assert!(platform.publish("t", "c").await.is_ok());
        assert_eq!(platform.publish_call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_publish_always_fails() {
        let platform = MockPlatform::publish_failure(
            "test",
            PlatformError::Authentication("Unauthorized".to_string()),
        );

        assert!(platform.publish("t", "c").await.is_err());
        assert!(platform.publish("t", "c").await.is_err());
        assert!(platform.published().is_empty());
    }

    #[tokio::test]
    async fn test_mock_with_delay() {
        let platform = MockPlatform::success("test").with_delay(Duration::from_millis(50));

        let start = std::time::Instant::now();
        platform.publish("t", "c").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
