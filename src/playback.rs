//! Audio output seam.
//!
//! The host owns the real output device; channels only need "play this clip
//! to the end" and "stop now".

use crate::error::Result;
use crate::tts::{AudioEncoding, SynthesizedAudio};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Fallback clip length when neither the provider nor the encoding tells us.
const UNKNOWN_CLIP_DURATION: Duration = Duration::from_secs(1);

/// Shared audio output.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio`, resolving once playback has finished naturally.
    async fn play(&self, audio: &SynthesizedAudio) -> Result<()>;

    /// Stop whatever is playing. Must be safe to call when idle.
    fn stop(&self);
}

/// Best-effort clip length.
pub fn clip_duration(audio: &SynthesizedAudio) -> Duration {
    if let Some(duration) = audio.duration {
        return duration;
    }
    match audio.encoding {
        AudioEncoding::Pcm16 { sample_rate } if sample_rate > 0 => {
            let samples = audio.bytes.len() as u64 / 2;
            Duration::from_millis(samples * 1000 / u64::from(sample_rate))
        }
        _ => UNKNOWN_CLIP_DURATION,
    }
}

/// Sink that "plays" by waiting out the clip length. Used by headless hosts.
#[derive(Debug, Default)]
pub struct SimulatedSink {
    stop: Notify,
}

impl SimulatedSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioSink for SimulatedSink {
    async fn play(&self, audio: &SynthesizedAudio) -> Result<()> {
        let duration = clip_duration(audio);
        debug!(millis = duration.as_millis() as u64, "simulated playback");
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop.notified() => debug!("simulated playback stopped"),
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }
}
