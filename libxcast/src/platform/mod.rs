//! Platform abstraction and the X implementation
//!
//! The dispatch pipeline talks to the outside world through the [`Platform`]
//! trait: one call to refresh an OAuth2 grant, one call to publish content.
//! Production uses [`x::XPlatform`]; tests use [`mock::MockPlatform`].

use async_trait::async_trait;

use crate::error::{PlatformError, Result};

pub mod x;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Tokens returned by the provider's refresh grant
///
/// `refresh_token` is optional because providers do not always rotate it;
/// callers fall back to the previous one when absent. `expires_in_secs` is
/// relative and must be normalized to an absolute expiry before storage.
#[derive(Debug, Clone)]
pub struct RefreshedCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

/// Unified interface to the social platform API
#[async_trait]
pub trait Platform: Send + Sync {
    /// Exchange a refresh token for fresh credentials
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` when the refresh token is
    /// rejected or revoked, `PlatformError::Network` on transport problems.
    async fn refresh_credentials(&self, refresh_token: &str) -> Result<RefreshedCredentials>;

    /// Publish content on behalf of the holder of `access_token`
    ///
    /// Returns the platform-assigned post ID.
    ///
    /// # Errors
    ///
    /// Returns an error classified by [`PlatformError`]; authentication-class
    /// failures mean the credential is unusable until re-authorization.
    async fn publish(&self, access_token: &str, content: &str) -> Result<String>;

    /// Validate content before posting
    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        let limit = self.character_limit();
        let length = content.chars().count();
        if length > limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds {} character limit (got {} characters)",
                limit, length
            ))
            .into());
        }

        Ok(())
    }

    /// Lowercase identifier for the platform
    fn name(&self) -> &str;

    /// Maximum number of characters allowed in a post
    fn character_limit(&self) -> usize {
        280
    }
}
