//! Remote text-to-speech over HTTP.
//!
//! Sends `{"text": ..., "voice": ...}` as JSON and treats the response body
//! as audio; the container format is taken from `Content-Type`.

use super::{AudioEncoding, SpeechSynthesizer, SynthesizedAudio};
use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

/// Remote synthesizer.
pub struct HttpSynthesizer {
    endpoint: String,
    api_key: Option<String>,
    voice: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSynthesizer")
            .field("endpoint", &self.endpoint)
            .field("voice", &self.voice)
            .finish()
    }
}

impl HttpSynthesizer {
    /// Create a synthesizer posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Config(format!("cannot build TTS client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: None,
            voice: None,
            client,
        })
    }

    /// Build from config. Returns `Ok(None)` when remote synthesis is disabled
    /// or no endpoint is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &TtsConfig) -> Result<Option<Self>> {
        if !config.remote_enabled {
            return Ok(None);
        }
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };
        let mut synth = Self::new(endpoint, config.timeout())?;
        synth.api_key = config.api_key.clone();
        synth.voice = config.voice.clone();
        Ok(Some(synth))
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        "http"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let body = SynthesisRequest {
            text,
            voice: self.voice.as_deref(),
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("TTS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SpeechError::Synthesis(format!(
                "TTS HTTP {}: {body_text}",
                status.as_u16()
            )));
        }

        let encoding = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(AudioEncoding::from_mime)
            .unwrap_or(AudioEncoding::Mpeg);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("TTS body read failed: {e}")))?;
        if bytes.is_empty() {
            return Err(SpeechError::Synthesis("TTS returned empty audio".to_owned()));
        }
        debug!(bytes = bytes.len(), ?encoding, "remote synthesis complete");

        Ok(SynthesizedAudio {
            bytes,
            encoding,
            duration: None,
        })
    }
}
