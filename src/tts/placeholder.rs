//! Always-available on-device voice for headless hosts.
//!
//! Produces an empty PCM clip that carries only its estimated speaking time,
//! so timing, arbitration and queueing behave as with a real voice without
//! buffering silence. Sinks time it through [`clip_duration`].
//!
//! [`clip_duration`]: crate::playback::clip_duration

use super::{AudioEncoding, SpeechSynthesizer, SynthesizedAudio};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

const SAMPLE_RATE: u32 = 16_000;
const MIN_DURATION: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct PlaceholderVoice {
    words_per_minute: u32,
}

impl Default for PlaceholderVoice {
    fn default() -> Self {
        Self {
            words_per_minute: 160,
        }
    }
}

impl PlaceholderVoice {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
        }
    }

    /// Estimated speaking time for `text`.
    pub fn estimate(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u64;
        let millis = words * 60_000 / u64::from(self.words_per_minute);
        Duration::from_millis(millis).max(MIN_DURATION)
    }
}

#[async_trait]
impl SpeechSynthesizer for PlaceholderVoice {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn is_on_device(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            bytes: Bytes::new(),
            encoding: AudioEncoding::Pcm16 {
                sample_rate: SAMPLE_RATE,
            },
            duration: Some(self.estimate(text)),
        })
    }
}
