//! Session registry: opaque token -> authenticated user.
//!
//! The map is guarded by a mutex held only across lookups and writes,
//! never across I/O. Each successful lookup refreshes the activity clock;
//! idle sessions expire lazily on their next use.

use crate::error::{ApiError, ApiResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default idle expiry: 30 minutes.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Resolved identity attached to every authenticated request.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub home_dir: PathBuf,
}

struct SessionEntry {
    session: Session,
    last_activity: Instant,
}

/// Concurrent token table.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SESSION_IDLE_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Create a session and return its opaque token.
    pub fn create(&self, user_id: i64, username: &str, home_dir: PathBuf) -> ApiResult<String> {
        let token = Uuid::new_v4().simple().to_string();
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| ApiError::internal("session mutex poisoned"))?;
        sessions.insert(
            token.clone(),
            SessionEntry {
                session: Session {
                    user_id,
                    username: username.to_string(),
                    home_dir,
                },
                last_activity: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Resolve a token, refreshing its activity clock. Expired or unknown
    /// tokens are an auth failure.
    pub fn resolve(&self, token: &str) -> ApiResult<Session> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| ApiError::internal("session mutex poisoned"))?;
        match sessions.get_mut(token) {
            Some(entry) => {
                if entry.last_activity.elapsed() > self.idle_timeout {
                    sessions.remove(token);
                    return Err(ApiError::Auth);
                }
                entry.last_activity = Instant::now();
                Ok(entry.session.clone())
            }
            None => Err(ApiError::Auth),
        }
    }

    /// Erase a session; unknown tokens are fine.
    pub fn remove(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_resolve_roundtrip() {
        let registry = SessionRegistry::default();
        let token = registry.create(7, "alice", PathBuf::from("/data/users/alice")).unwrap();
        let session = registry.resolve(&token).unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(session.username, "alice");
    }

    #[test]
    fn test_unknown_token_is_auth_error() {
        let registry = SessionRegistry::default();
        assert!(matches!(registry.resolve("nope"), Err(ApiError::Auth)));
    }

    #[test]
    fn test_logout_removes_session() {
        let registry = SessionRegistry::default();
        let token = registry.create(1, "alice", PathBuf::from("/h")).unwrap();
        registry.remove(&token);
        assert!(registry.resolve(&token).is_err());
    }

    #[test]
    fn test_idle_sessions_expire() {
        let registry = SessionRegistry::new(Duration::from_millis(0));
        let token = registry.create(1, "alice", PathBuf::from("/h")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(registry.resolve(&token), Err(ApiError::Auth)));
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = SessionRegistry::default();
        let a = registry.create(1, "alice", PathBuf::from("/h")).unwrap();
        let b = registry.create(1, "alice", PathBuf::from("/h")).unwrap();
        assert_ne!(a, b);
    }
}
