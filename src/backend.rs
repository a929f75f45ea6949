//! Text-generation collaborator.
//!
//! The orchestrator hands the backend a prompt plus a serialized view of the
//! conversation and gets back a single line to speak. Backends may fail; the
//! orchestrator falls back to a canned line.

use crate::config::BackendConfig;
use crate::error::{Result, SpeechError};
use crate::orchestrator::ConversationContext;
use crate::types::{UserInfo, UtteranceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Everything the backend needs for one generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub kind: UtteranceKind,
    /// Instruction text built for this kind.
    pub prompt: String,
    /// Raw producer input (the chat message, the emotion summary, ...).
    pub input: String,
    pub user: UserInfo,
    pub context: ConversationContext,
}

/// Generated text plus the untouched response body.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReply {
    pub text: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

impl GenerationReply {
    /// Parse a backend body that carries its text in `message` or `response`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Backend`] if neither field holds a string.
    pub fn from_raw(raw: serde_json::Value) -> Result<Self> {
        let body: ReplyBody = serde_json::from_value(raw.clone())
            .map_err(|e| SpeechError::Backend(format!("malformed reply: {e}")))?;
        let text = body
            .message
            .or(body.response)
            .ok_or_else(|| SpeechError::Backend("reply has no message or response".into()))?;
        Ok(Self { text, raw })
    }
}

/// Text-generation backend contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply>;
}

/// Backend reached over HTTP with a JSON POST.
pub struct HttpConversationBackend {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpConversationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConversationBackend")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl HttpConversationBackend {
    /// Create a backend posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Config(format!("cannot build backend client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: None,
            client,
        })
    }

    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured or the client cannot be built.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| SpeechError::Config("backend.endpoint is not set".into()))?;
        let mut backend = Self::new(endpoint, config.timeout())?;
        backend.api_key = config.api_key.clone();
        Ok(backend)
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Pull a human-readable message out of an error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl ConversationBackend for HttpConversationBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply> {
        let mut http = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| SpeechError::Backend(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SpeechError::Backend(format!(
                "HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body_text)
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SpeechError::Backend(format!("reply is not JSON: {e}")))?;
        let reply = GenerationReply::from_raw(raw)?;
        debug!(kind = %request.kind, chars = reply.text.len(), "generation complete");
        Ok(reply)
    }
}
