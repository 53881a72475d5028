//! Async REST client for the flash protocol.
//!
//! Thin typed wrapper over `reqwest`. Every call races against the caller's
//! cancellation token; non-2xx responses are decoded into
//! [`AgentError::Api`] from the server's JSON error body.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use flashlock_common::protocol::{
    CompleteRequest, CompleteResponse, CreateSessionRequest, SessionEnvelope,
};

use crate::error::{AgentError, Result};

pub struct FlashClient {
    http: Client,
    base_url: String,
}

impl FlashClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Error bodies are {code, error, message}; fall back to the status
        // line when the body is not ours.
        let body = response.json::<Value>().await.ok();
        let field = |name: &str| {
            body.as_ref()
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        Err(AgentError::Api {
            status: status.as_u16(),
            code: field("error").unwrap_or_else(|| "UNKNOWN".into()),
            message: field("message").unwrap_or_else(|| status.to_string()),
        })
    }

    // ── Protocol calls ────────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionEnvelope> {
        let response = self
            .execute(
                self.http
                    .post(format!("{}/api/flash/sessions", self.base_url))
                    .json(request),
                cancel,
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
        hwid: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionEnvelope> {
        let response = self
            .execute(
                self.http
                    .get(format!("{}/api/flash/sessions/{session_id}", self.base_url))
                    .query(&[("hwid", hwid)]),
                cancel,
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Download one sealed artifact blob (`nonce‖tag‖ciphertext` under the
    /// session key). The bytes are ciphertext; decryption happens in the
    /// orchestrator, in memory.
    pub async fn fetch_firmware(
        &self,
        session_id: &str,
        artifact: &str,
        hwid: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let response = self
            .execute(
                self.http
                    .get(format!(
                        "{}/api/flash/sessions/{session_id}/firmware/{artifact}",
                        self.base_url
                    ))
                    .query(&[("hwid", hwid)]),
                cancel,
            )
            .await?;

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = response.bytes() => result?,
        };
        Ok(bytes.to_vec())
    }

    pub async fn complete(
        &self,
        session_id: &str,
        request: &CompleteRequest,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse> {
        let response = self
            .execute(
                self.http
                    .post(format!(
                        "{}/api/flash/sessions/{session_id}/complete",
                        self.base_url
                    ))
                    .json(request),
                cancel,
            )
            .await?;
        Ok(response.json().await?)
    }
}
