//! HTTP transport for the chat endpoint.
//!
//! One request per call: `POST {base}/ask` with `{"message": string}`,
//! answered by `{"response": string, "audio_url"?: string}`. The call is
//! not abortable; the coordinator discards stale results by turn id
//! instead of cancelling in-flight requests.

use crate::error::{Result, VoxaError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A successful reply from the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// The assistant's textual reply.
    pub text: String,
    /// Synthesized-speech resource for the reply, if the service produced
    /// one. Relative URLs have already been resolved against the API base.
    pub audio_url: Option<Url>,
}

/// Request body for `POST /ask`.
#[derive(Debug, Serialize)]
struct AskRequest<'a> {
    message: &'a str,
}

/// Response body for `POST /ask`.
#[derive(Debug, Deserialize)]
struct AskResponse {
    response: String,
    #[serde(default)]
    audio_url: Option<String>,
}

/// Boundary to the remote chat service.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send one user message and await the reply.
    ///
    /// # Errors
    ///
    /// Returns [`VoxaError::EmptyInput`] for whitespace-only messages
    /// (rejected locally, no network call) and [`VoxaError::Transport`]
    /// for network failures or non-success statuses. No retries.
    async fn ask(&self, message: &str) -> Result<ChatReply>;
}

/// Real transport over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpChatClient {
    /// Create a client for the given API base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| VoxaError::Config(format!("invalid API base URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoxaError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }

    /// The API base URL this client resolves audio references against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a possibly-relative audio reference against the API base.
    fn resolve_audio_url(&self, reference: &str) -> Result<Url> {
        self.base_url
            .join(reference)
            .map_err(|e| VoxaError::Transport(format!("invalid audio URL '{reference}': {e}")))
    }
}

#[async_trait]
impl ChatTransport for HttpChatClient {
    async fn ask(&self, message: &str) -> Result<ChatReply> {
        if message.trim().is_empty() {
            return Err(VoxaError::EmptyInput);
        }

        let endpoint = self
            .base_url
            .join("ask")
            .map_err(|e| VoxaError::Transport(format!("invalid endpoint URL: {e}")))?;

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(endpoint)
            .json(&AskRequest { message })
            .send()
            .await
            .map_err(|e| VoxaError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoxaError::Transport(format!(
                "chat endpoint returned status {status}"
            )));
        }

        let body: AskResponse = response
            .json()
            .await
            .map_err(|e| VoxaError::Transport(format!("invalid response body: {e}")))?;
        debug!(latency_ms = started.elapsed().as_millis() as u64, "chat reply received");

        let audio_url = body
            .audio_url
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| self.resolve_audio_url(r))
            .transpose()?;

        Ok(ChatReply {
            text: body.response,
            audio_url,
        })
    }
}
