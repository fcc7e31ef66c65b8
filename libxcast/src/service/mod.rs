//! Service layer for Xcast
//!
//! A single facade, [`XcastService`], wires the database, platform client,
//! token lifecycle manager, publisher, dispatcher, and post service from one
//! configuration so that every consumer (HTTP server, tests) gets the same
//! object graph. An alternative platform implementation and a session mirror
//! can be injected, which is how tests swap in the mock platform and how the
//! server makes background refreshes visible to live sessions.

pub mod posts;

pub use posts::PostService;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::dispatch::Dispatcher;
use crate::platform::x::XPlatform;
use crate::platform::Platform;
use crate::publisher::Publisher;
use crate::session::SessionMirror;
use crate::tokens::TokenManager;
use crate::Result;

/// Main service facade coordinating the publish pipeline
pub struct XcastService {
    db: Database,
    tokens: TokenManager,
    posts: PostService,
    dispatcher: Dispatcher,
}

impl XcastService {
    /// Create a service backed by the real X platform client
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized, migrations
    /// fail, or the HTTP client cannot be built.
    pub async fn new(config: &Config) -> Result<Self> {
        let platform = Arc::new(XPlatform::new(&config.platform)?);
        Self::with_platform(config, platform, None).await
    }

    /// Create a service with an injected platform and optional session mirror
    pub async fn with_platform(
        config: &Config,
        platform: Arc<dyn Platform>,
        mirror: Option<Arc<dyn SessionMirror>>,
    ) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;

        let mut tokens = TokenManager::new(db.clone(), platform.clone());
        if let Some(mirror) = mirror {
            tokens = tokens.with_mirror(mirror);
        }

        let publisher = Publisher::new(platform.clone(), tokens.clone());
        let posts = PostService::new(db.clone(), publisher.clone(), platform);
        let dispatcher = Dispatcher::new(
            db.clone(),
            publisher,
            config.dispatch.tolerance_minutes,
            config.dispatch.max_post_attempts,
        );

        Ok(Self {
            db,
            tokens,
            posts,
            dispatcher,
        })
    }

    /// Access the database directly
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Access the token lifecycle manager
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Access the post service
    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    /// Access the dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
