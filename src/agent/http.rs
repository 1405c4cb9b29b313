//! Typed HTTP client for the server API.
//!
//! Thin request/response plumbing over `reqwest`; retry policy lives with
//! the callers. Every request carries the session token header and a
//! per-request deadline.

use crate::agent::error::{AgentError, AgentResult};
use crate::protocol::{
    Envelope, LoginData, LoginRequest, ManifestItem, ManifestRequest, ManifestResponse,
    MkdirRequest, RegisterData, RegisterRequest, RenameRequest, SyncOperation, API_BASE,
    AUTH_TOKEN_HEADER, FILE_CHECKSUM_HEADER, FILE_RELATIVE_PATH_HEADER,
};
use reqwest::multipart;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(server_url: &str, timeout: Duration) -> AgentResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("{}{}", server_url.trim_end_matches('/'), API_BASE),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success statuses to errors, pulling the message out of the
    /// server's JSON error envelope when there is one.
    async fn check(response: Response) -> AgentResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(AgentError::AuthFailed);
        }
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());
        Err(AgentError::Server {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn register(&self, username: &str, password: &str) -> AgentResult<RegisterData> {
        let response = self
            .http
            .post(self.url("/users/register"))
            .json(&RegisterRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let envelope: Envelope<RegisterData> = Self::check(response).await?.json().await?;
        envelope
            .data
            .ok_or_else(|| AgentError::Server {
                status: 200,
                message: "register response missing data".to_string(),
            })
    }

    pub async fn login(&self, username: &str, password: &str) -> AgentResult<LoginData> {
        let response = self
            .http
            .post(self.url("/users/login"))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let envelope: Envelope<LoginData> = Self::check(response).await?.json().await?;
        envelope.data.ok_or_else(|| AgentError::Server {
            status: 200,
            message: "login response missing data".to_string(),
        })
    }

    pub async fn logout(&self, token: &str) -> AgentResult<()> {
        let response = self
            .http
            .post(self.url("/users/logout"))
            .header(AUTH_TOKEN_HEADER, token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn upload(&self, token: &str, relative: &str, bytes: Vec<u8>) -> AgentResult<()> {
        let filename = relative
            .rsplit('/')
            .next()
            .unwrap_or(relative)
            .to_string();
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(bytes).file_name(filename),
        );
        let response = self
            .http
            .post(self.url("/files/upload"))
            .header(AUTH_TOKEN_HEADER, token)
            .header(FILE_RELATIVE_PATH_HEADER, relative)
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Download a file; returns the bytes plus the server's checksum header
    /// when present.
    pub async fn download(
        &self,
        token: &str,
        relative: &str,
    ) -> AgentResult<(Vec<u8>, Option<String>)> {
        let response = self
            .http
            .get(self.url("/files/download"))
            .header(AUTH_TOKEN_HEADER, token)
            .query(&[("path", relative)])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let checksum = response
            .headers()
            .get(FILE_CHECKSUM_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, checksum))
    }

    pub async fn mkdir(&self, token: &str, relative: &str) -> AgentResult<()> {
        let response = self
            .http
            .post(self.url("/files/mkdir"))
            .header(AUTH_TOKEN_HEADER, token)
            .json(&MkdirRequest {
                path: relative.to_string(),
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete(&self, token: &str, relative: &str) -> AgentResult<()> {
        let response = self
            .http
            .delete(self.url("/files/delete"))
            .header(AUTH_TOKEN_HEADER, token)
            .query(&[("path", relative)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn rename(&self, token: &str, old: &str, new: &str) -> AgentResult<()> {
        let response = self
            .http
            .post(self.url("/files/rename"))
            .header(AUTH_TOKEN_HEADER, token)
            .json(&RenameRequest {
                old_path: old.to_string(),
                new_path: new.to_string(),
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn post_manifest(
        &self,
        token: &str,
        items: Vec<ManifestItem>,
    ) -> AgentResult<Vec<SyncOperation>> {
        let response = self
            .http
            .post(self.url("/sync/manifest"))
            .header(AUTH_TOKEN_HEADER, token)
            .json(&ManifestRequest {
                client_files: items,
            })
            .send()
            .await?;
        let body: ManifestResponse = Self::check(response).await?.json().await?;
        Ok(body.sync_operations)
    }
}
