//! Shared fakes for integration tests. Only the public API is used here.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tutor_voice::backend::{ConversationBackend, GenerationReply, GenerationRequest};
use tutor_voice::playback::AudioSink;
use tutor_voice::tts::{AudioEncoding, SpeechSynthesizer, SynthesizedAudio};
use tutor_voice::{Result, SpeechConfig, SpeechError, SpeechSession};

/// Backend that answers `re: <input>`, or fails when told to.
#[derive(Default)]
pub(crate) struct EchoBackend {
    pub(crate) fail: bool,
    pub(crate) requests: Mutex<Vec<GenerationRequest>>,
}

impl EchoBackend {
    pub(crate) fn kinds(&self) -> Vec<tutor_voice::UtteranceKind> {
        self.requests.lock().unwrap().iter().map(|r| r.kind).collect()
    }
}

#[async_trait]
impl ConversationBackend for EchoBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply> {
        let text = format!("re: {}", request.input);
        self.requests.lock().unwrap().push(request);
        if self.fail {
            return Err(SpeechError::Backend("connection refused".into()));
        }
        Ok(GenerationReply {
            raw: serde_json::json!({ "response": text }),
            text,
        })
    }
}

/// On-device voice that records what it was asked to say.
#[derive(Default)]
pub(crate) struct RecordingVoice {
    pub(crate) spoken: Mutex<Vec<String>>,
}

impl RecordingVoice {
    pub(crate) fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingVoice {
    fn name(&self) -> &str {
        "recording"
    }

    fn is_on_device(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(SynthesizedAudio {
            bytes: Bytes::from_static(b"pcm"),
            encoding: AudioEncoding::Pcm16 { sample_rate: 16_000 },
            duration: Some(Duration::from_secs(2)),
        })
    }
}

/// Sink that sleeps for the clip duration and tracks overlap.
#[derive(Default)]
pub(crate) struct OverlapSink {
    active: AtomicUsize,
    pub(crate) max_active: AtomicUsize,
    stop: tokio::sync::Notify,
}

struct Playing<'a>(&'a AtomicUsize);

impl Drop for Playing<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for OverlapSink {
    async fn play(&self, audio: &SynthesizedAudio) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _playing = Playing(&self.active);
        tokio::select! {
            _ = tokio::time::sleep(tutor_voice::playback::clip_duration(audio)) => {}
            _ = self.stop.notified() => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }
}

pub(crate) struct Harness {
    pub(crate) session: SpeechSession,
    pub(crate) backend: Arc<EchoBackend>,
    pub(crate) voice: Arc<RecordingVoice>,
    pub(crate) sink: Arc<OverlapSink>,
}

pub(crate) fn harness(config: SpeechConfig, backend: EchoBackend) -> Harness {
    let backend = Arc::new(backend);
    let voice = Arc::new(RecordingVoice::default());
    let sink = Arc::new(OverlapSink::default());
    let session = SpeechSession::builder(config)
        .with_backend(backend.clone())
        .with_synthesizer(voice.clone())
        .with_sink(sink.clone())
        .build()
        .expect("build session");
    Harness {
        session,
        backend,
        voice,
        sink,
    }
}
