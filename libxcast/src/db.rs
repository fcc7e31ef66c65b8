//! Database operations for Xcast
//!
//! Credential columns live on the `users` table but are only ever read and
//! written through the dedicated credential methods, keeping token material
//! out of ordinary user queries.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::Result;
use crate::types::{Credentials, PostStatus, ScheduledPost, User};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Create a user together with its initial credentials
    pub async fn create_user(&self, user: &User, credentials: &Credentials) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, x_id, name, username, access_token, refresh_token, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.x_id)
        .bind(&user.name)
        .bind(&user.username)
        .bind(&credentials.access_token)
        .bind(&credentials.refresh_token)
        .bind(credentials.expires_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Get a user by internal id
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, x_id, name, username, created_at, updated_at
            FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(row_to_user))
    }

    /// Get a user by the platform-side identifier
    pub async fn get_user_by_x_id(&self, x_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, x_id, name, username, created_at, updated_at
            FROM users WHERE x_id = ?
            "#,
        )
        .bind(x_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(row_to_user))
    }

    /// Get a user's credentials
    pub async fn get_credentials(&self, user_id: &str) -> Result<Option<Credentials>> {
        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, expires_at
            FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| Credentials {
            access_token: r.get("access_token"),
            refresh_token: r.get("refresh_token"),
            expires_at: r.get("expires_at"),
        }))
    }

    /// Replace a user's credentials, typically after a refresh or re-authorization
    pub async fn update_credentials(&self, user_id: &str, credentials: &Credentials) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET access_token = ?, refresh_token = ?, expires_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&credentials.access_token)
        .bind(&credentials.refresh_token)
        .bind(credentials.expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    // ========================================================================
    // Posts
    // ========================================================================

    /// Create a new scheduled post
    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, content, x_post_id, scheduled_for, status, attempt_count, last_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.content)
        .bind(&post.x_post_id)
        .bind(post.scheduled_for)
        .bind(post.status.as_str())
        .bind(post.attempt_count)
        .bind(&post.last_error)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, content, x_post_id, scheduled_for, status, attempt_count, last_error, created_at, updated_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(row_to_post))
    }

    /// All posts for a user, soonest scheduled first
    pub async fn get_posts_by_user(&self, user_id: &str) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, content, x_post_id, scheduled_for, status, attempt_count, last_error, created_at, updated_at
            FROM posts WHERE user_id = ?
            ORDER BY scheduled_for ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.into_iter().map(row_to_post).collect())
    }

    /// Find a user's post with exactly this content (duplicate detection)
    pub async fn find_post_by_content(
        &self,
        user_id: &str,
        content: &str,
    ) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, content, x_post_id, scheduled_for, status, attempt_count, last_error, created_at, updated_at
            FROM posts WHERE user_id = ? AND content = ?
            "#,
        )
        .bind(user_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(row_to_post))
    }

    /// Posts eligible for a dispatch pass: pending or failed, due by `cutoff`,
    /// and under the attempt cap. Oldest scheduled first so per-user processing
    /// order is deterministic.
    pub async fn get_due_posts(&self, cutoff: i64, max_attempts: i64) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, content, x_post_id, scheduled_for, status, attempt_count, last_error, created_at, updated_at
            FROM posts
            WHERE status IN ('pending', 'failed')
              AND scheduled_for <= ?
              AND attempt_count < ?
            ORDER BY scheduled_for ASC
            "#,
        )
        .bind(cutoff)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.into_iter().map(row_to_post).collect())
    }

    /// Update post status only
    pub async fn update_post_status(&self, post_id: &str, status: PostStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts SET status = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Write back the outcome of one publish attempt: status, the platform
    /// post id on success, the error on failure, and one more attempt counted.
    pub async fn record_dispatch_result(
        &self,
        post_id: &str,
        status: PostStatus,
        x_post_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET status = ?,
                x_post_id = COALESCE(?, x_post_id),
                last_error = ?,
                attempt_count = attempt_count + 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(x_post_id)
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Update content and/or schedule time of a post
    pub async fn update_post_fields(
        &self,
        post_id: &str,
        content: Option<&str>,
        scheduled_for: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET content = COALESCE(?, content),
                scheduled_for = COALESCE(?, scheduled_for),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(content)
        .bind(scheduled_for)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Delete a post
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM posts WHERE id = ?"#)
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }
}

fn row_to_user(r: sqlx::sqlite::SqliteRow) -> User {
    User {
        id: r.get("id"),
        x_id: r.get("x_id"),
        name: r.get("name"),
        username: r.get("username"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn row_to_post(r: sqlx::sqlite::SqliteRow) -> ScheduledPost {
    ScheduledPost {
        id: r.get("id"),
        user_id: r.get("user_id"),
        content: r.get("content"),
        x_post_id: r.get("x_post_id"),
        scheduled_for: r.get("scheduled_for"),
        status: PostStatus::from_str_or_pending(&r.get::<String, _>("status")),
        attempt_count: r.get("attempt_count"),
        last_error: r.get("last_error"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}
