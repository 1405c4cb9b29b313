//! Session token lifecycle for the agent.
//!
//! Holds the credentials and the current token; `ensure_authenticated`
//! logs in lazily, `invalidate` drops the token so the next call logs in
//! again. The retry-exactly-once contract on AUTH_FAILED lives with the
//! callers in the coordinator.

use crate::agent::error::AgentResult;
use crate::agent::http::ApiClient;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct AuthManager {
    client: Arc<ApiClient>,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl AuthManager {
    pub fn new(client: Arc<ApiClient>, username: String, password: String) -> Self {
        Self {
            client,
            username,
            password,
            token: Mutex::new(None),
        }
    }

    /// Return the current token, logging in first when there is none.
    pub async fn ensure_authenticated(&self) -> AgentResult<String> {
        if let Some(token) = self.token.lock().expect("token mutex").clone() {
            return Ok(token);
        }
        let login = self
            .client
            .login(&self.username, &self.password)
            .await?;
        info!(username = %self.username, "logged in");
        *self.token.lock().expect("token mutex") = Some(login.token.clone());
        Ok(login.token)
    }

    /// Forget the current token. Called when the server answers 401.
    pub fn invalidate(&self) {
        *self.token.lock().expect("token mutex") = None;
    }

    /// Best-effort logout on shutdown.
    pub async fn logout(&self) {
        let token = self.token.lock().expect("token mutex").take();
        if let Some(token) = token {
            if let Err(e) = self.client.logout(&token).await {
                tracing::debug!("logout failed: {}", e);
            }
        }
    }
}
