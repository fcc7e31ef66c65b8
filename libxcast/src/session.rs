//! In-memory session store
//!
//! Live web sessions keep a mirrored copy of the user's credentials so that
//! interactive requests do not have to re-read the database on every call.
//! The store implements [`SessionMirror`], which the token lifecycle manager
//! notifies whenever it persists refreshed credentials, so a refresh performed
//! by a background dispatch pass becomes visible to concurrently served
//! requests without forcing re-authentication.
//!
//! Sessions are created by the OAuth callback (outside this crate) via
//! [`SessionStore::insert`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::Credentials;

/// Receives credential updates performed by the token lifecycle manager
///
/// Injected explicitly; there is no global session state.
pub trait SessionMirror: Send + Sync {
    fn credentials_updated(&self, user_id: &str, credentials: &Credentials);
}

/// A live user session
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub credentials: Credentials,
}

/// Thread-safe map of opaque session tokens to sessions
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under an opaque token
    pub fn insert(&self, token: impl Into<String>, session: Session) {
        self.inner.write().unwrap().insert(token.into(), session);
    }

    /// Look up a session by token
    pub fn get(&self, token: &str) -> Option<Session> {
        self.inner.read().unwrap().get(token).cloned()
    }

    /// Drop a session (logout)
    pub fn remove(&self, token: &str) {
        self.inner.write().unwrap().remove(token);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl SessionMirror for SessionStore {
    fn credentials_updated(&self, user_id: &str, credentials: &Credentials) {
        let mut sessions = self.inner.write().unwrap();
        for session in sessions.values_mut() {
            if session.user_id == user_id {
                session.credentials = credentials.clone();
            }
        }
    }
}
