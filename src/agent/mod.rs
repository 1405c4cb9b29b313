//! The client agent: configuration, local observation, and the sync loop.
//!
//! - `config`: the line-oriented `key=value` config file
//! - `http`: reqwest wrapper around the server API
//! - `auth`: session token lifecycle (login, invalidate, retry-once)
//! - `scanner`: local tree walk producing manifest entries
//! - `app_data`: the persisted set of paths believed to exist server-side
//! - `watcher`: filesystem events with rename correlation and
//!   self-induced-event suppression
//! - `coordinator`: drains events, paces syncs, applies server operations

pub mod app_data;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod scanner;
pub mod watcher;

pub use app_data::AppData;
pub use auth::AuthManager;
pub use config::AgentConfig;
pub use coordinator::SyncCoordinator;
pub use error::{AgentError, AgentResult};
pub use http::ApiClient;
pub use scanner::scan_local;
pub use watcher::{watcher_task, IgnoreSet, WatchEvent};
