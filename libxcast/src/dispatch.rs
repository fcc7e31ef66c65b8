//! Dispatch pass orchestration
//!
//! One pass selects the due posts, resolves each owner's credentials once,
//! publishes, and writes the outcome back. Posts of different users are
//! processed concurrently (their credentials are disjoint); posts of one user
//! strictly sequentially, oldest schedule first, sharing a single in-memory
//! credential copy so a token refresh happens at most once per user per pass
//! and two refreshes never race on the same refresh token.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::publisher::Publisher;
use crate::types::{PostStatus, ScheduledPost};
use crate::Result;

/// Per-post failure entry in a pass summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub post_id: String,
    pub reason: String,
}

/// Result of one dispatch pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub posted: usize,
    pub failed: usize,
    pub errors: Vec<DispatchFailure>,
}

enum Outcome {
    Posted,
    Failed { post_id: String, reason: String },
}

/// Runs dispatch passes over the scheduled post queue
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    publisher: Publisher,
    /// Window past "now" that absorbs trigger jitter
    tolerance_minutes: i64,
    /// Posts stop being auto-selected once attempt_count reaches this cap
    max_post_attempts: i64,
    /// Serializes passes: an external trigger firing while the previous pass
    /// is still running must not double-select the same posts
    pass_lock: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        publisher: Publisher,
        tolerance_minutes: i64,
        max_post_attempts: i64,
    ) -> Self {
        Self {
            db,
            publisher,
            tolerance_minutes,
            max_post_attempts,
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Execute one dispatch pass and return its summary
    ///
    /// Per-post failures (including status write failures) are isolated: they
    /// are logged, counted in the summary, and never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only when the due-post query itself fails; everything
    /// after that degrades per post.
    pub async fn run_pass(&self) -> Result<DispatchSummary> {
        let _pass = self.pass_lock.lock().await;

        let now = chrono::Utc::now().timestamp();
        let cutoff = now + self.tolerance_minutes * 60;

        let due = self.db.get_due_posts(cutoff, self.max_post_attempts).await?;

        if due.is_empty() {
            debug!("No posts due in this dispatch window");
            return Ok(DispatchSummary::default());
        }

        let total = due.len();
        info!(count = total, "Found due post(s) to dispatch");

        let futures: Vec<_> = group_by_user(due)
            .into_iter()
            .map(|(user_id, posts)| {
                let dispatcher = self.clone();
                async move { dispatcher.process_user_posts(&user_id, posts).await }
            })
            .collect();

        let outcomes: Vec<Outcome> = join_all(futures).await.into_iter().flatten().collect();

        let mut summary = DispatchSummary {
            total,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Posted => summary.posted += 1,
                Outcome::Failed { post_id, reason } => {
                    summary.failed += 1;
                    summary.errors.push(DispatchFailure { post_id, reason });
                }
            }
        }

        info!(
            total = summary.total,
            posted = summary.posted,
            failed = summary.failed,
            "Dispatch pass complete"
        );

        Ok(summary)
    }

    /// Process one user's due posts sequentially
    ///
    /// The credential copy resolved here is threaded through every publish so
    /// a refresh done for the first post is visible to the rest. After an
    /// unrecoverable credential failure the remaining posts are failed
    /// outright, without further refresh or publish calls.
    async fn process_user_posts(&self, user_id: &str, posts: Vec<ScheduledPost>) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(posts.len());

        let mut credentials = match self.db.get_credentials(user_id).await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                // A post cannot outlive its owner
                warn!(user_id = %user_id, "Owner not found, failing due posts");
                for post in posts {
                    outcomes.push(self.reconcile_failure(&post, "User not found").await);
                }
                return outcomes;
            }
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "Failed to load credentials");
                for post in posts {
                    outcomes.push(
                        self.reconcile_failure(&post, &format!("Credential lookup failed: {}", error))
                            .await,
                    );
                }
                return outcomes;
            }
        };

        let mut credentials_dead = false;

        for post in posts {
            if credentials_dead {
                outcomes.push(
                    self.reconcile_failure(&post, "Credentials unusable earlier in this pass")
                        .await,
                );
                continue;
            }

            match self
                .publisher
                .publish(user_id, &mut credentials, &post.content)
                .await
            {
                Ok(x_post_id) => {
                    outcomes.push(self.reconcile_success(&post, &x_post_id).await);
                }
                Err(publish_error) => {
                    if publish_error.unrecoverable {
                        credentials_dead = true;
                    }
                    outcomes.push(
                        self.reconcile_failure(&post, &publish_error.to_string())
                            .await,
                    );
                }
            }
        }

        outcomes
    }

    async fn reconcile_success(&self, post: &ScheduledPost, x_post_id: &str) -> Outcome {
        if let Err(error) = self
            .db
            .record_dispatch_result(&post.id, PostStatus::Posted, Some(x_post_id), None)
            .await
        {
            // The publish went out; surface the bookkeeping failure but keep going
            warn!(post_id = %post.id, error = %error, "Failed to record posted status");
        }
        info!(post_id = %post.id, x_post_id = %x_post_id, "Post published");
        Outcome::Posted
    }

    async fn reconcile_failure(&self, post: &ScheduledPost, reason: &str) -> Outcome {
        if let Err(error) = self
            .db
            .record_dispatch_result(&post.id, PostStatus::Failed, None, Some(reason))
            .await
        {
            warn!(post_id = %post.id, error = %error, "Failed to record failed status");
        }
        warn!(post_id = %post.id, reason = %reason, "Post failed to publish");
        Outcome::Failed {
            post_id: post.id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Group due posts by owner, preserving the oldest-first order within each user
fn group_by_user(posts: Vec<ScheduledPost>) -> HashMap<String, Vec<ScheduledPost>> {
    let mut grouped: HashMap<String, Vec<ScheduledPost>> = HashMap::new();
    for post in posts {
        grouped.entry(post.user_id.clone()).or_default().push(post);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platform::mock::MockPlatform;
    use crate::publisher::RetryPolicy;
    use crate::tokens::TokenManager;
    use crate::types::{Credentials, User};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const TOLERANCE_MINUTES: i64 = 2;
    const MAX_ATTEMPTS: i64 = 5;

    async fn setup(platform: Arc<MockPlatform>) -> (TempDir, Database, Dispatcher) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

        let tokens = TokenManager::new(db.clone(), platform.clone());
        let publisher = Publisher::new(platform, tokens).with_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            min_retry_after: Duration::from_millis(10),
        });
        let dispatcher = Dispatcher::new(db.clone(), publisher, TOLERANCE_MINUTES, MAX_ATTEMPTS);

        (temp_dir, db, dispatcher)
    }

    async fn create_user_with_valid_credentials(db: &Database) -> User {
        let user = User::new(
            uuid::Uuid::new_v4().to_string(),
            "Test".to_string(),
            "test".to_string(),
        );
        let creds = Credentials {
            access_token: Some("access".to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(chrono::Utc::now().timestamp() + 7200),
        };
        db.create_user(&user, &creds).await.unwrap();
        user
    }

    async fn create_user_with_expiring_credentials(db: &Database) -> User {
        let user = User::new(
            uuid::Uuid::new_v4().to_string(),
            "Test".to_string(),
            "test".to_string(),
        );
        let creds = Credentials {
            access_token: Some("stale".to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(chrono::Utc::now().timestamp() + 60),
        };
        db.create_user(&user, &creds).await.unwrap();
        user
    }

    fn due_post(user_id: &str, content: &str, offset_secs: i64) -> ScheduledPost {
        ScheduledPost::new(
            user_id.to_string(),
            content.to_string(),
            chrono::Utc::now().timestamp() + offset_secs,
        )
    }

    #[tokio::test]
    async fn test_empty_window_returns_zero_summary() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, _db, dispatcher) = setup(platform.clone()).await;

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.posted, 0);
        assert_eq!(summary.failed, 0);
        assert!(summary.errors.is_empty());
        assert_eq!(platform.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_post_due_one_minute_ago_is_dispatched() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        let post = due_post(&user.id, "a minute late", -60);
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.posted, 1);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        assert!(stored.x_post_id.is_some());
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_post_slightly_early_within_tolerance_is_dispatched() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform).await;
        let user = create_user_with_valid_credentials(&db).await;

        // 60s in the future, inside the 2-minute tolerance window
        let post = due_post(&user.id, "slightly early", 60);
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();
        assert_eq!(summary.posted, 1);
    }

    #[tokio::test]
    async fn test_post_beyond_tolerance_is_not_selected() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        let post = due_post(&user.id, "way in the future", 600);
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(platform.publish_call_count(), 0);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn test_posted_post_is_never_republished() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        let mut post = due_post(&user.id, "already out", -60);
        post.status = PostStatus::Posted;
        post.x_post_id = Some("x-1".to_string());
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(platform.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_post_is_reselected_and_can_recover() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        let mut post = due_post(&user.id, "second chance", -60);
        post.status = PostStatus::Failed;
        post.attempt_count = 1;
        post.last_error = Some("network down".to_string());
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.posted, 1);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        assert_eq!(stored.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_missing_owner_marks_post_failed() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;

        let post = due_post("ghost-user", "orphaned", -60);
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].reason.contains("User not found"));
        assert_eq!(platform.publish_call_count(), 0);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_two_due_posts_same_user_refresh_once() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_expiring_credentials(&db).await;

        db.create_post(&due_post(&user.id, "first", -120)).await.unwrap();
        db.create_post(&due_post(&user.id, "second", -60)).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.posted, 2);
        // Exactly one refresh serves both posts
        assert_eq!(platform.refresh_call_count(), 1);

        // Both publishes used the refreshed token, in schedule order
        let published = platform.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], ("x-access-1".to_string(), "first".to_string()));
        assert_eq!(published[1], ("x-access-1".to_string(), "second".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_failure_fails_all_user_posts_without_hot_looping() {
        let platform = Arc::new(MockPlatform::refresh_failure("x", "token revoked"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_expiring_credentials(&db).await;

        db.create_post(&due_post(&user.id, "first", -120)).await.unwrap();
        db.create_post(&due_post(&user.id, "second", -60)).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.failed, 2);
        // One refresh attempt for the whole pass, no publish calls
        assert_eq!(platform.refresh_call_count(), 1);
        assert_eq!(platform.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_publish_fails_remaining_user_posts() {
        let platform = Arc::new(MockPlatform::publish_failure(
            "x",
            PlatformError::Authentication("Unauthorized".to_string()),
        ));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        db.create_post(&due_post(&user.id, "first", -120)).await.unwrap();
        db.create_post(&due_post(&user.id, "second", -60)).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.failed, 2);
        // Single publish attempt; the second post is failed without a call
        assert_eq!(platform.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_marks_failed_and_counts_attempt() {
        let platform = Arc::new(MockPlatform::publish_failure(
            "x",
            PlatformError::Network("connection reset".to_string()),
        ));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        let post = due_post(&user.id, "flaky network", -60);
        db.create_post(&post).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(summary.errors[0].reason.contains("connection reset"));
        // Three in-pass attempts are one dispatch attempt on the post
        assert_eq!(platform.publish_call_count(), 3);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some(summary.errors[0].reason.as_str()));
    }

    #[tokio::test]
    async fn test_attempt_cap_stops_reselection() {
        let platform = Arc::new(MockPlatform::publish_failure(
            "x",
            PlatformError::Network("down".to_string()),
        ));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let dispatcher = Dispatcher::new(
            db.clone(),
            dispatcher.publisher.clone(),
            TOLERANCE_MINUTES,
            1,
        );
        let user = create_user_with_valid_credentials(&db).await;

        let post = due_post(&user.id, "doomed", -60);
        db.create_post(&post).await.unwrap();

        let first = dispatcher.run_pass().await.unwrap();
        assert_eq!(first.failed, 1);

        // attempt_count reached the cap of 1; the next pass skips the post
        let second = dispatcher.run_pass().await.unwrap();
        assert_eq!(second.total, 0);
    }

    #[tokio::test]
    async fn test_one_users_failure_does_not_affect_another_user() {
        let platform = Arc::new(MockPlatform::failing_then_success(
            "x",
            vec![
                PlatformError::Authentication("Unauthorized".to_string()),
            ],
        ));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;

        let unlucky = create_user_with_valid_credentials(&db).await;
        let lucky = create_user_with_valid_credentials(&db).await;

        // Only one due post per user; whichever is published first consumes
        // the scripted failure
        db.create_post(&due_post(&unlucky.id, "will fail", -120)).await.unwrap();
        db.create_post(&due_post(&lucky.id, "will succeed", -60)).await.unwrap();

        let summary = dispatcher.run_pass().await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.posted + summary.failed, 2);
        assert_eq!(summary.posted, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_overlapping_passes_do_not_double_publish() {
        let platform = Arc::new(MockPlatform::success("x"));
        let (_tmp, db, dispatcher) = setup(platform.clone()).await;
        let user = create_user_with_valid_credentials(&db).await;

        let post = due_post(&user.id, "once only", -60);
        db.create_post(&post).await.unwrap();

        // Two passes racing: the second waits for the first and then finds
        // the post already terminal
        let (first, second) = tokio::join!(dispatcher.run_pass(), dispatcher.run_pass());

        let totals = first.unwrap().total + second.unwrap().total;
        assert_eq!(totals, 1);
        assert_eq!(platform.publish_call_count(), 1);

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
    }

    #[tokio::test]
    async fn test_summary_serializes_for_the_trigger_response() {
        let summary = DispatchSummary {
            total: 2,
            posted: 1,
            failed: 1,
            errors: vec![DispatchFailure {
                post_id: "p1".to_string(),
                reason: "User not found".to_string(),
            }],
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["errors"][0]["post_id"], "p1");
    }
}
