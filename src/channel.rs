//! Per-source speech channel: synthesize, acquire the audio output, play, release.
//!
//! Each `speak()` call gets a generation number and a cancellation token.
//! Continuations re-check that their generation is still current before they
//! touch channel state, so a cancelled or superseded request can finish its
//! await without side effects. `on_end` fires exactly once per call, including
//! when the `speak()` future itself is dropped.

use crate::lock_unpoisoned;
use crate::playback::AudioSink;
use crate::registry::SpeechRegistry;
use crate::tts::SpeechSynthesizer;
use crate::types::SpeechSourceId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Idle,
    Loading,
    Speaking,
    /// Transient; a failed request passes through here on its way to `Idle`.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelEvent {
    Begin,
    Synthesized,
    PlaybackEnded,
    Failed,
    Recovered,
    Cancel,
}

/// The single transition function of the channel state machine.
fn next_phase(phase: ChannelPhase, event: ChannelEvent) -> Option<ChannelPhase> {
    use ChannelEvent as E;
    use ChannelPhase as P;
    match (phase, event) {
        (_, E::Cancel) => Some(P::Idle),
        (P::Idle, E::Begin) => Some(P::Loading),
        (P::Loading, E::Synthesized) => Some(P::Speaking),
        (P::Speaking, E::PlaybackEnded) => Some(P::Idle),
        (P::Loading | P::Speaking, E::Failed) => Some(P::Error),
        (P::Error, E::Recovered) => Some(P::Idle),
        _ => None,
    }
}

/// Why a `speak()` call was turned away without playing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyText,
    Muted,
    /// Another source holds the audio output and `force` was not set.
    ResourceBusy,
}

/// How a `speak()` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    Finished,
    Rejected(RejectReason),
    Cancelled,
    /// Every synthesizer failed, or playback failed.
    Failed(String),
}

impl SpeakOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeakOptions {
    /// Speak even when muted or when another source is audible.
    pub force: bool,
}

type StartHook = Box<dyn FnOnce() + Send>;
type EndHook = Box<dyn FnOnce(&SpeakOutcome) + Send>;

/// Optional callbacks for one `speak()` call.
#[derive(Default)]
pub struct SpeakHooks {
    on_start: Option<StartHook>,
    on_end: Option<EndHook>,
}

impl std::fmt::Debug for SpeakHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

impl SpeakHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once playback begins.
    #[must_use]
    pub fn on_start(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Called exactly once when the call ends, whatever the outcome.
    #[must_use]
    pub fn on_end(mut self, hook: impl FnOnce(&SpeakOutcome) + Send + 'static) -> Self {
        self.on_end = Some(Box::new(hook));
        self
    }
}

#[derive(Debug)]
struct ActiveSpeech {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug)]
struct ChannelInner {
    phase: ChannelPhase,
    next_generation: u64,
    current: Option<ActiveSpeech>,
}

/// Coordinated speech channel for one source.
pub struct SpeechChannel {
    source: SpeechSourceId,
    registry: Arc<SpeechRegistry>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    muted: AtomicBool,
    inner: Mutex<ChannelInner>,
    phase_tx: watch::Sender<ChannelPhase>,
}

impl std::fmt::Debug for SpeechChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechChannel")
            .field("source", &self.source)
            .field("phase", &self.phase())
            .field("muted", &self.is_muted())
            .finish()
    }
}

impl SpeechChannel {
    pub fn new(
        source: SpeechSourceId,
        registry: Arc<SpeechRegistry>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(ChannelPhase::Idle);
        Self {
            source,
            registry,
            synthesizer,
            sink,
            muted: AtomicBool::new(false),
            inner: Mutex::new(ChannelInner {
                phase: ChannelPhase::Idle,
                next_generation: 1,
                current: None,
            }),
            phase_tx,
        }
    }

    pub fn source(&self) -> SpeechSourceId {
        self.source
    }

    pub fn phase(&self) -> ChannelPhase {
        lock_unpoisoned(&self.inner).phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase() != ChannelPhase::Idle
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ChannelPhase> {
        self.phase_tx.subscribe()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Mute or unmute. Muting also stops anything this channel is saying.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
        if muted {
            self.cancel();
        }
    }

    fn apply(&self, inner: &mut ChannelInner, event: ChannelEvent) -> bool {
        match next_phase(inner.phase, event) {
            Some(phase) => {
                debug!(source = %self.source, from = ?inner.phase, to = ?phase, ?event, "channel transition");
                inner.phase = phase;
                self.phase_tx.send_replace(phase);
                true
            }
            None => {
                debug!(source = %self.source, phase = ?inner.phase, ?event, "ignored illegal transition");
                false
            }
        }
    }

    fn is_current(inner: &ChannelInner, generation: u64) -> bool {
        inner
            .current
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Supersede whatever is in flight and enter `Loading` for a new request.
    fn begin(&self) -> (u64, CancellationToken) {
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(previous) = inner.current.take() {
            debug!(source = %self.source, superseded = previous.generation, "superseding in-flight speech");
            previous.token.cancel();
            if inner.phase == ChannelPhase::Speaking {
                self.sink.stop();
            }
            self.registry.unregister(self.source);
        }
        if inner.phase != ChannelPhase::Idle {
            self.apply(&mut inner, ChannelEvent::Cancel);
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let token = CancellationToken::new();
        inner.current = Some(ActiveSpeech {
            generation,
            token: token.clone(),
        });
        self.apply(&mut inner, ChannelEvent::Begin);
        (generation, token)
    }

    /// Take the audio output and enter `Speaking`, if this request is still current.
    fn acquire(&self, generation: u64, force: bool) -> Result<(), SpeakOutcome> {
        let mut inner = lock_unpoisoned(&self.inner);
        if !Self::is_current(&inner, generation) {
            return Err(SpeakOutcome::Cancelled);
        }
        let acquired = if force {
            self.registry.register(self.source);
            true
        } else {
            self.registry.try_register(self.source)
        };
        if !acquired {
            inner.current = None;
            self.apply(&mut inner, ChannelEvent::Cancel);
            return Err(SpeakOutcome::Rejected(RejectReason::ResourceBusy));
        }
        self.apply(&mut inner, ChannelEvent::Synthesized);
        Ok(())
    }

    fn complete(&self, generation: u64) -> SpeakOutcome {
        let mut inner = lock_unpoisoned(&self.inner);
        if !Self::is_current(&inner, generation) {
            return SpeakOutcome::Cancelled;
        }
        inner.current = None;
        self.apply(&mut inner, ChannelEvent::PlaybackEnded);
        self.registry.unregister(self.source);
        SpeakOutcome::Finished
    }

    fn fail(&self, generation: u64, reason: String) -> SpeakOutcome {
        let mut inner = lock_unpoisoned(&self.inner);
        if !Self::is_current(&inner, generation) {
            return SpeakOutcome::Cancelled;
        }
        warn!(source = %self.source, generation, "speech failed: {reason}");
        inner.current = None;
        self.apply(&mut inner, ChannelEvent::Failed);
        self.registry.unregister(self.source);
        self.apply(&mut inner, ChannelEvent::Recovered);
        SpeakOutcome::Failed(reason)
    }

    /// Release everything held by `generation` if it is still current.
    fn abandon(&self, generation: u64) {
        let mut inner = lock_unpoisoned(&self.inner);
        if !Self::is_current(&inner, generation) {
            return;
        }
        if let Some(active) = inner.current.take() {
            active.token.cancel();
        }
        if inner.phase == ChannelPhase::Speaking {
            self.sink.stop();
        }
        self.apply(&mut inner, ChannelEvent::Cancel);
        self.registry.unregister(self.source);
    }

    /// Speak `text` on this channel.
    ///
    /// Never fails outward: the result says how the call ended and `on_end`
    /// observes the same value.
    pub async fn speak(&self, text: &str, options: SpeakOptions, hooks: SpeakHooks) -> SpeakOutcome {
        let SpeakHooks { on_start, on_end } = hooks;
        let mut guard = EndGuard {
            channel: self,
            generation: None,
            on_end,
        };

        let text = text.trim();
        if text.is_empty() {
            return guard.finish(SpeakOutcome::Rejected(RejectReason::EmptyText));
        }
        if self.is_muted() && !options.force {
            debug!(source = %self.source, "muted; dropping speech");
            return guard.finish(SpeakOutcome::Rejected(RejectReason::Muted));
        }

        let (generation, token) = self.begin();
        guard.generation = Some(generation);

        let synthesized = tokio::select! {
            biased;
            _ = token.cancelled() => return guard.finish(SpeakOutcome::Cancelled),
            result = self.synthesizer.synthesize(text) => result,
        };
        let audio = match synthesized {
            Ok(audio) => audio,
            Err(e) => {
                let outcome = self.fail(generation, e.to_string());
                return guard.finish(outcome);
            }
        };

        if let Err(outcome) = self.acquire(generation, options.force) {
            return guard.finish(outcome);
        }
        info!(source = %self.source, generation, chars = text.len(), "speaking");
        if let Some(hook) = on_start {
            hook();
        }

        let played = tokio::select! {
            biased;
            _ = token.cancelled() => return guard.finish(SpeakOutcome::Cancelled),
            result = self.sink.play(&audio) => result,
        };
        drop(audio);

        let outcome = match played {
            Ok(()) => self.complete(generation),
            Err(e) => self.fail(generation, e.to_string()),
        };
        debug!(source = %self.source, generation, ?outcome, "speech ended");
        guard.finish(outcome)
    }

    /// Stop immediately from any phase. Safe to call repeatedly.
    pub fn cancel(&self) {
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(active) = inner.current.take() {
            info!(source = %self.source, generation = active.generation, "speech cancelled");
            active.token.cancel();
        }
        if inner.phase == ChannelPhase::Speaking {
            self.sink.stop();
        }
        if inner.phase != ChannelPhase::Idle {
            self.apply(&mut inner, ChannelEvent::Cancel);
        }
        self.registry.unregister(self.source);
    }
}

/// Fires `on_end` exactly once: explicitly through `finish`, or on drop.
struct EndGuard<'a> {
    channel: &'a SpeechChannel,
    generation: Option<u64>,
    on_end: Option<EndHook>,
}

impl EndGuard<'_> {
    fn finish(&mut self, outcome: SpeakOutcome) -> SpeakOutcome {
        self.generation = None;
        if let Some(hook) = self.on_end.take() {
            hook(&outcome);
        }
        outcome
    }
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            self.channel.abandon(generation);
        }
        if let Some(hook) = self.on_end.take() {
            hook(&SpeakOutcome::Cancelled);
        }
    }
}
