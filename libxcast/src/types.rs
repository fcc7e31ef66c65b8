//! Core types for Xcast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user account linked to an X identity
///
/// Token material lives in [`Credentials`], not here, so user records can be
/// serialized into API responses without leaking secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// The platform-side user identifier (unique)
    pub x_id: String,
    pub name: String,
    pub username: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn new(x_id: String, name: String, username: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            x_id,
            name,
            username,
            created_at: now,
            updated_at: now,
        }
    }
}

/// OAuth2 token material for one user
///
/// `expires_at` is an absolute unix timestamp, normalized once from the
/// provider's relative `expires_in` at issuance time. A missing `expires_at`
/// means the credentials are treated as expired.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

impl Credentials {
    /// Credentials with no token material (user must authorize)
    pub fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_at: None,
        }
    }
}

/// A post scheduled for future publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub content: String,
    /// Platform-assigned post id, set only after a successful publish
    pub x_post_id: Option<String>,
    pub scheduled_for: i64,
    pub status: PostStatus,
    /// Total dispatch attempts across all passes
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledPost {
    pub fn new(user_id: String, content: String, scheduled_for: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            content,
            x_post_id: None,
            scheduled_for,
            status: PostStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Post lifecycle status
///
/// Valid transitions: pending -> posted, pending -> failed,
/// failed -> posted. Posted is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }

    pub fn from_str_or_pending(s: &str) -> Self {
        match s {
            "posted" => Self::Posted,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
