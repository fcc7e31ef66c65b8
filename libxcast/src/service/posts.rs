//! Post service: the user-facing scheduling operations
//!
//! Every operation authenticates ownership before touching a post, and every
//! rejection carries a client-facing message. Publishing a single post on
//! demand goes through the same publisher as the dispatch pass.

use std::sync::Arc;
use tracing::info;

use crate::db::Database;
use crate::error::{Result, XcastError};
use crate::platform::Platform;
use crate::publisher::Publisher;
use crate::types::{PostStatus, ScheduledPost};

#[derive(Clone)]
pub struct PostService {
    db: Database,
    publisher: Publisher,
    platform: Arc<dyn Platform>,
}

impl PostService {
    pub fn new(db: Database, publisher: Publisher, platform: Arc<dyn Platform>) -> Self {
        Self {
            db,
            publisher,
            platform,
        }
    }

    /// Schedule new content for future publication
    ///
    /// # Errors
    ///
    /// Rejects empty or over-long content, and content the user has already
    /// scheduled (duplicate protection against client retries).
    pub async fn schedule(
        &self,
        user_id: &str,
        content: &str,
        scheduled_for: i64,
    ) -> Result<ScheduledPost> {
        self.platform.validate_content(content)?;

        if self
            .db
            .find_post_by_content(user_id, content)
            .await?
            .is_some()
        {
            return Err(XcastError::InvalidInput(
                "Post with same content already exists".to_string(),
            ));
        }

        let post = ScheduledPost::new(user_id.to_string(), content.to_string(), scheduled_for);
        self.db.create_post(&post).await?;

        info!(post_id = %post.id, user_id = %user_id, scheduled_for, "Post scheduled");

        Ok(post)
    }

    /// All posts belonging to a user, soonest scheduled first
    pub async fn list(&self, user_id: &str) -> Result<Vec<ScheduledPost>> {
        self.db.get_posts_by_user(user_id).await
    }

    /// Edit content and/or schedule time of an unpublished post
    ///
    /// # Errors
    ///
    /// Rejects unknown posts, posts owned by someone else, posts already
    /// published, invalid content, and duplicate content.
    pub async fn update(
        &self,
        user_id: &str,
        post_id: &str,
        content: Option<&str>,
        scheduled_for: Option<i64>,
    ) -> Result<ScheduledPost> {
        let post = self.owned_post(user_id, post_id).await?;

        if post.status == PostStatus::Posted {
            return Err(XcastError::InvalidInput(
                "Post has already been published".to_string(),
            ));
        }

        if let Some(content) = content {
            self.platform.validate_content(content)?;

            if let Some(existing) = self.db.find_post_by_content(user_id, content).await? {
                if existing.id != post.id {
                    return Err(XcastError::InvalidInput(
                        "Post with same content already exists".to_string(),
                    ));
                }
            }
        }

        self.db
            .update_post_fields(post_id, content, scheduled_for)
            .await?;

        self.db
            .get_post(post_id)
            .await?
            .ok_or_else(|| XcastError::NotFound("Post not found".to_string()))
    }

    /// Delete a post
    pub async fn delete(&self, user_id: &str, post_id: &str) -> Result<()> {
        self.owned_post(user_id, post_id).await?;
        self.db.delete_post(post_id).await?;
        info!(post_id = %post_id, user_id = %user_id, "Post deleted");
        Ok(())
    }

    /// Publish a single post immediately, skipping its schedule
    ///
    /// Performs the same publish-and-reconcile step the dispatch pass uses,
    /// and returns the updated post.
    ///
    /// # Errors
    ///
    /// Rejects unknown posts, posts owned by someone else, and posts already
    /// published; a repeated call never publishes twice.
    pub async fn post_now(&self, user_id: &str, post_id: &str) -> Result<ScheduledPost> {
        let post = self.owned_post(user_id, post_id).await?;

        if post.status == PostStatus::Posted {
            return Err(XcastError::InvalidInput(
                "Post has already been published".to_string(),
            ));
        }

        let mut credentials = self
            .db
            .get_credentials(user_id)
            .await?
            .ok_or_else(|| XcastError::NotFound("User not found".to_string()))?;

        match self
            .publisher
            .publish(user_id, &mut credentials, &post.content)
            .await
        {
            Ok(x_post_id) => {
                self.db
                    .record_dispatch_result(&post.id, PostStatus::Posted, Some(&x_post_id), None)
                    .await?;
                info!(post_id = %post.id, x_post_id = %x_post_id, "Post published on demand");
            }
            Err(publish_error) => {
                let reason = publish_error.to_string();
                self.db
                    .record_dispatch_result(&post.id, PostStatus::Failed, None, Some(&reason))
                    .await?;
                return Err(publish_error.error);
            }
        }

        self.db
            .get_post(post_id)
            .await?
            .ok_or_else(|| XcastError::NotFound("Post not found".to_string()))
    }

    /// Fetch a post and verify it belongs to `user_id`
    async fn owned_post(&self, user_id: &str, post_id: &str) -> Result<ScheduledPost> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| XcastError::NotFound("Post not found".to_string()))?;

        if post.user_id != user_id {
            return Err(XcastError::Forbidden(
                "Post belongs to another user".to_string(),
            ));
        }

        Ok(post)
    }
}
