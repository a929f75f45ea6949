//! Shared test doubles used across module test suites.

use crate::backend::{ConversationBackend, GenerationReply, GenerationRequest};
use crate::channel::{SpeakHooks, SpeakOutcome};
use crate::emotion::{EmotionClassifier, EmotionReading};
use crate::error::{Result, SpeechError};
use crate::lock_unpoisoned;
use crate::playback::AudioSink;
use crate::tts::{AudioEncoding, SpeechSynthesizer, SynthesizedAudio};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Synthesizer whose audio bytes are its own name, so tests can tell which
/// provider produced a clip.
#[derive(Debug)]
pub struct ScriptedSynthesizer {
    name: String,
    fail: bool,
    on_device: bool,
    delay: Duration,
    calls: AtomicUsize,
    texts: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedSynthesizer {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            on_device: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::ok(name)
        }
    }

    pub fn on_device(mut self) -> Self {
        self.on_device = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text this synthesizer was asked to say, in call order.
    pub fn texts(&self) -> Vec<String> {
        lock_unpoisoned(&self.texts)
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// When each synthesis request arrived.
    pub fn call_times(&self) -> Vec<Instant> {
        lock_unpoisoned(&self.texts)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_on_device(&self) -> bool {
        self.on_device
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock_unpoisoned(&self.texts).push((Instant::now(), text.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SpeechError::Synthesis(format!("{} unavailable", self.name)));
        }
        Ok(SynthesizedAudio {
            bytes: Bytes::from(self.name.clone().into_bytes()),
            encoding: AudioEncoding::Mpeg,
            duration: None,
        })
    }
}

/// Sink that plays every clip for a fixed time and records what happened.
#[derive(Debug)]
pub struct RecordingSink {
    play_duration: Duration,
    fail: bool,
    plays: AtomicUsize,
    stops: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_concurrent: AtomicUsize,
    stop: Notify,
}

impl RecordingSink {
    pub fn new(play_duration: Duration) -> Self {
        Self {
            play_duration,
            fail: false,
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrent: AtomicUsize::new(0),
            stop: Notify::new(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Highest number of clips that were ever playing at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

struct ActivePlay(Arc<AtomicUsize>);

impl Drop for ActivePlay {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, _audio: &SynthesizedAudio) -> Result<()> {
        if self.fail {
            return Err(SpeechError::Playback("device unplugged".into()));
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActivePlay(Arc::clone(&self.active));
        self.max_concurrent.fetch_max(now_active, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.play_duration) => {}
            _ = self.stop.notified() => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop.notify_waiters();
    }
}

/// Counts `on_end` invocations and keeps the last outcome.
#[derive(Debug, Clone, Default)]
pub struct EndCounter {
    count: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<SpeakOutcome>>>,
}

impl EndCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(&self) -> SpeakHooks {
        let count = Arc::clone(&self.count);
        let last = Arc::clone(&self.last);
        SpeakHooks::new().on_end(move |outcome| {
            count.fetch_add(1, Ordering::SeqCst);
            *lock_unpoisoned(&last) = Some(outcome.clone());
        })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<SpeakOutcome> {
        lock_unpoisoned(&self.last).clone()
    }
}

/// Backend that answers `re: <input>` after an optional delay.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    fail: bool,
    delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply> {
        let input = request.input.clone();
        lock_unpoisoned(&self.requests).push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SpeechError::Backend("backend offline".into()));
        }
        let text = format!("re: {input}");
        Ok(GenerationReply {
            raw: serde_json::json!({ "message": text }),
            text,
        })
    }
}

/// Classifier that returns the same reading on every poll.
#[derive(Debug)]
pub struct FixedClassifier {
    reading: Option<EmotionReading>,
    calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(reading: Option<EmotionReading>) -> Self {
        Self {
            reading,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmotionClassifier for FixedClassifier {
    async fn classify(&self) -> Result<Option<EmotionReading>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reading.clone())
    }
}
