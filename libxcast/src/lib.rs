//! Xcast - scheduled posting for X
//!
//! This library provides the core of the scheduled-publish pipeline:
//! credential lifecycle management, publishing with bounded retry, and the
//! dispatch pass that publishes due posts on users' behalf.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod platform;
pub mod publisher;
pub mod scheduling;
pub mod service;
pub mod session;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatch::{DispatchSummary, Dispatcher};
pub use error::{Result, XcastError};
pub use publisher::{Publisher, RetryPolicy};
pub use service::XcastService;
pub use session::{Session, SessionStore};
pub use tokens::TokenManager;
pub use types::{Credentials, PostStatus, ScheduledPost, User};
