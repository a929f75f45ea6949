//! Text-to-speech providers.
//!
//! Synthesis goes through a [`SynthesisChain`]: a phrase cache in front of an
//! ordered list of [`SpeechSynthesizer`]s tried one after another. The last
//! entry is normally an on-device voice that cannot fail for network reasons.

pub mod cache;
pub mod chain;
pub mod http;
pub mod placeholder;

pub use cache::SynthesisCache;
pub use chain::SynthesisChain;
pub use http::HttpSynthesizer;
pub use placeholder::PlaceholderVoice;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Container format of synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEncoding {
    Mpeg,
    Wav,
    /// Raw little-endian 16-bit mono PCM.
    Pcm16 { sample_rate: u32 },
    Other(String),
}

impl AudioEncoding {
    /// Map a `Content-Type` header value to an encoding.
    pub fn from_mime(mime: &str) -> Self {
        let base = mime.split(';').next().unwrap_or("").trim();
        match base {
            "audio/mpeg" | "audio/mp3" => Self::Mpeg,
            "audio/wav" | "audio/wave" | "audio/x-wav" => Self::Wav,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Audio produced for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub bytes: Bytes,
    pub encoding: AudioEncoding,
    /// Playback length when the provider knows it.
    pub duration: Option<Duration>,
}

/// A text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Stable provider name for logs.
    fn name(&self) -> &str;

    /// On-device voices are not cached, so a recovered remote voice takes over again.
    fn is_on_device(&self) -> bool {
        false
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}
