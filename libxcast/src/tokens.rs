//! OAuth2 token lifecycle management
//!
//! Decides when stored credentials are still usable, performs the refresh
//! grant when they are not, and persists the outcome. Refreshed credentials
//! are returned to the caller and pushed into an optional [`SessionMirror`]
//! in the same logical operation, so live web sessions observe them without
//! re-authentication.

use std::sync::Arc;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{PlatformError, Result};
use crate::platform::Platform;
use crate::session::SessionMirror;
use crate::types::Credentials;

/// Refresh this long before the provider-side expiry so in-flight publish
/// calls never race against it
pub const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Whether credentials expiring at `expires_at` are unusable at `now`
///
/// A missing expiry is treated as expired (fail-safe). The boundary is
/// inclusive: exactly five minutes before expiry counts as expired.
pub fn is_expired_at(expires_at: Option<i64>, now: i64) -> bool {
    match expires_at {
        None => true,
        Some(expires_at) => now >= expires_at - EXPIRY_BUFFER_SECS,
    }
}

/// [`is_expired_at`] against the current time
pub fn is_expired(expires_at: Option<i64>) -> bool {
    is_expired_at(expires_at, chrono::Utc::now().timestamp())
}

/// Normalize the provider's relative `expires_in` to an absolute timestamp
pub fn expires_at_from(expires_in_secs: i64, now: i64) -> i64 {
    now + expires_in_secs
}

/// Normalize a stored expiry value of unknown shape
///
/// Accepts a unix timestamp or an RFC 3339 string; anything else becomes
/// `None`, which downstream code treats as expired.
pub fn parse_expires_at(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ts) = raw.parse::<i64>() {
        return Some(ts);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Token lifecycle manager
///
/// Holds no credential state itself; every operation reads the caller's copy
/// and writes through to the database.
#[derive(Clone)]
pub struct TokenManager {
    db: Database,
    platform: Arc<dyn Platform>,
    mirror: Option<Arc<dyn SessionMirror>>,
}

impl TokenManager {
    pub fn new(db: Database, platform: Arc<dyn Platform>) -> Self {
        Self {
            db,
            platform,
            mirror: None,
        }
    }

    /// Attach a session mirror that is notified after every persisted refresh
    pub fn with_mirror(mut self, mirror: Arc<dyn SessionMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Return usable credentials for `user_id`, refreshing if necessary
    ///
    /// Credentials that are present and outside the expiry buffer are
    /// returned unchanged. Otherwise the refresh grant runs with the stored
    /// refresh token; the new access token, the rotated refresh token (or the
    /// previous one when the provider omits it), and the recomputed absolute
    /// expiry are persisted and mirrored before being returned.
    ///
    /// # Errors
    ///
    /// Any refresh failure (revoked token, network failure, provider error)
    /// is unrecoverable for the operation that needed the credentials; the
    /// caller must not retry the refresh within the same dispatch pass.
    pub async fn ensure_valid(&self, user_id: &str, current: &Credentials) -> Result<Credentials> {
        if current.access_token.is_some() && !is_expired(current.expires_at) {
            return Ok(current.clone());
        }

        debug!(user_id = %user_id, "Access token missing or expiring, refreshing");

        let refresh_token = current.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Authentication("No refresh token available".to_string())
        })?;

        let refreshed = self.platform.refresh_credentials(refresh_token).await?;

        let now = chrono::Utc::now().timestamp();
        let updated = Credentials {
            access_token: Some(refreshed.access_token),
            // Providers do not always rotate the refresh token
            refresh_token: refreshed
                .refresh_token
                .or_else(|| current.refresh_token.clone()),
            expires_at: Some(expires_at_from(refreshed.expires_in_secs, now)),
        };

        self.db.update_credentials(user_id, &updated).await?;

        if let Some(mirror) = &self.mirror {
            mirror.credentials_updated(user_id, &updated);
        }

        info!(user_id = %user_id, "Refreshed platform credentials");

        Ok(updated)
    }
}
