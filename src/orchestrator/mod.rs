//! Conversation orchestrator: decides whether an utterance happens, generates
//! it, and routes it to the right speech channel.
//!
//! At most one request is processed at a time. Requests arriving while one is
//! in flight are either dropped (low priority while something is audible) or
//! queued, and the queue is drained in arrival order once the orchestrator
//! goes idle, with a settle delay between utterances.

pub mod context;
pub mod prompts;

pub use context::{ContextMessage, ConversationContext};

use crate::activity::ActivityTracker;
use crate::backend::{ConversationBackend, GenerationRequest};
use crate::channel::{RejectReason, SpeakHooks, SpeakOptions, SpeakOutcome, SpeechChannel};
use crate::config::{OrchestratorConfig, SpeechConfig};
use crate::emotion;
use crate::history::{ConversationHistoryEntry, HistoryBuffer};
use crate::lock_unpoisoned;
use crate::registry::SpeechRegistry;
use crate::throttle::ThrottleWindows;
use crate::types::{
    EmotionContext, HistoryRole, Priority, RequestOptions, SpeechSourceId, UserInfo,
    UtteranceKind,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A request waiting for the orchestrator to go idle.
#[derive(Debug, Clone)]
pub struct PendingUtterance {
    pub input: String,
    pub kind: UtteranceKind,
    pub producer_payload: Value,
    pub enqueued_at: Instant,
    options: RequestOptions,
}

/// Why a request produced no speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Something is audible and the request was not high priority.
    ResourceBusy,
    /// The kind fired too recently.
    Throttled { remaining: Duration },
    AlreadyGreeted,
    GreetingDisabled,
    /// The pending queue is full.
    QueueFull,
    EmptyInput,
    /// Emotion reading without a face, below the confidence floor, or neutral.
    EmotionNotActionable,
    /// The avatar has not earned an idle remark.
    NotIdle,
    /// The orchestrator was reset while the request was in flight.
    SessionReset,
    /// A reply was generated but the channel played nothing.
    ChannelRejected(RejectReason),
}

/// Result of `request_utterance` and the producer helpers.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Text was generated (or a fallback line chosen) and playback started.
    Spoken {
        text: String,
        fallback: bool,
        speech: SpeakOutcome,
    },
    /// Waiting behind the in-flight request.
    Queued,
    Suppressed(SuppressReason),
}

impl RequestOutcome {
    pub fn is_spoken(&self) -> bool {
        matches!(self, Self::Spoken { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Fresh,
    /// Popped from the pending queue; goes back to the front if bounced.
    Drained,
}

#[derive(Debug, Default)]
struct Arbiter {
    in_flight: usize,
    pending: VecDeque<PendingUtterance>,
    draining: bool,
}

/// Clears the in-flight mark on every exit path and schedules the queue drain.
struct ProcessingPermit {
    orchestrator: Arc<Orchestrator>,
}

impl Drop for ProcessingPermit {
    fn drop(&mut self) {
        self.orchestrator.release();
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    follow_up_window: Duration,
    emotion_floor: f32,
    greeting_enabled: bool,
    registry: Arc<SpeechRegistry>,
    activity: Arc<ActivityTracker>,
    channels: HashMap<SpeechSourceId, Arc<SpeechChannel>>,
    backend: Arc<dyn ConversationBackend>,
    user: Mutex<UserInfo>,
    history: Mutex<HistoryBuffer>,
    throttle: Mutex<ThrottleWindows>,
    arbiter: Mutex<Arbiter>,
    has_greeted: AtomicBool,
    epoch: AtomicU64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("processing", &self.is_processing())
            .field("pending", &self.pending_len())
            .field("has_greeted", &self.has_greeted())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        config: &SpeechConfig,
        registry: Arc<SpeechRegistry>,
        activity: Arc<ActivityTracker>,
        channels: impl IntoIterator<Item = Arc<SpeechChannel>>,
        backend: Arc<dyn ConversationBackend>,
    ) -> Self {
        let orchestrator = &config.orchestrator;
        Self {
            config: orchestrator.clone(),
            follow_up_window: config.activity.follow_up_window(),
            emotion_floor: config.emotion.confidence_floor,
            greeting_enabled: config.avatar.greeting_enabled,
            registry,
            activity,
            channels: channels
                .into_iter()
                .map(|channel| (channel.source(), channel))
                .collect(),
            backend,
            user: Mutex::new(UserInfo::from(&config.user)),
            history: Mutex::new(HistoryBuffer::new(
                orchestrator.history_capacity,
                orchestrator.history_retention(),
            )),
            throttle: Mutex::new(ThrottleWindows::new(&config.throttle)),
            arbiter: Mutex::new(Arbiter::default()),
            has_greeted: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn channel(&self, source: SpeechSourceId) -> Option<Arc<SpeechChannel>> {
        self.channels.get(&source).cloned()
    }

    pub fn set_user(&self, user: UserInfo) {
        *lock_unpoisoned(&self.user) = user;
    }

    pub fn user(&self) -> UserInfo {
        lock_unpoisoned(&self.user).clone()
    }

    pub fn is_processing(&self) -> bool {
        lock_unpoisoned(&self.arbiter).in_flight > 0
    }

    pub fn pending_len(&self) -> usize {
        lock_unpoisoned(&self.arbiter).pending.len()
    }

    pub fn has_greeted(&self) -> bool {
        self.has_greeted.load(Ordering::Acquire)
    }

    // --- history ---------------------------------------------------------

    /// Append an entry stamped with the current tracker state.
    pub fn add_to_history(
        &self,
        role: HistoryRole,
        content: &str,
        metadata: Value,
    ) -> Arc<ConversationHistoryEntry> {
        let snapshot = context::snapshot(&self.activity, self.registry.snapshot().active_sources);
        let entry = ConversationHistoryEntry::new(role, content, snapshot, metadata);
        lock_unpoisoned(&self.history).push(entry)
    }

    /// The last `n` entries, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<Arc<ConversationHistoryEntry>> {
        lock_unpoisoned(&self.history).recent(n)
    }

    pub fn clear_history(&self) {
        lock_unpoisoned(&self.history).clear();
    }

    /// Drop entries past the retention window. Returns how many were removed.
    pub fn purge_history(&self) -> usize {
        let purged = lock_unpoisoned(&self.history).purge_expired();
        if purged > 0 {
            debug!(purged, "expired history entries purged");
        }
        purged
    }

    pub fn build_context(&self) -> ConversationContext {
        let recent = self.recent_history(self.config.context_entries);
        ConversationContext::build(
            &recent,
            &self.activity,
            self.registry.snapshot().active_sources,
            self.config.context_entry_max_chars,
            self.follow_up_window,
        )
    }

    /// Forget queued requests, history, throttle state and the greeting latch.
    ///
    /// Requests still waiting on the backend discard their reply.
    pub fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let dropped = {
            let mut arbiter = lock_unpoisoned(&self.arbiter);
            let dropped = arbiter.pending.len();
            arbiter.pending.clear();
            dropped
        };
        self.clear_history();
        lock_unpoisoned(&self.throttle).reset();
        self.has_greeted.store(false, Ordering::Release);
        info!(epoch, dropped, "orchestrator reset");
    }

    // --- arbitration -----------------------------------------------------

    /// Single entry point for every generated utterance.
    ///
    /// Returns immediately with `Queued` or `Suppressed` when the request
    /// cannot run now; otherwise resolves once the utterance has been spoken.
    pub async fn request_utterance(
        self: &Arc<Self>,
        kind: UtteranceKind,
        input: impl Into<String>,
        producer_payload: Value,
        mut options: RequestOptions,
    ) -> RequestOutcome {
        if kind == UtteranceKind::Chat {
            options.priority = Priority::High;
        }
        let input = input.into();
        if input.trim().is_empty() {
            debug!(%kind, "empty input ignored");
            return RequestOutcome::Suppressed(SuppressReason::EmptyInput);
        }
        let request = PendingUtterance {
            input,
            kind,
            producer_payload,
            enqueued_at: Instant::now(),
            options,
        };
        self.process(request, Admission::Fresh).await
    }

    fn admit(
        self: &Arc<Self>,
        request: PendingUtterance,
        admission: Admission,
    ) -> std::result::Result<(ProcessingPermit, PendingUtterance), RequestOutcome> {
        let mut arbiter = lock_unpoisoned(&self.arbiter);
        let kind = request.kind;
        let options = request.options;

        if !options.force {
            let low_priority = options.priority != Priority::High;
            if low_priority && self.registry.is_any_speaking() {
                debug!(%kind, "dropped: another source is speaking");
                return Err(RequestOutcome::Suppressed(SuppressReason::ResourceBusy));
            }
            if arbiter.in_flight > 0 {
                match admission {
                    Admission::Fresh => {
                        if arbiter.pending.len() >= self.config.max_pending {
                            warn!(%kind, max = self.config.max_pending, "pending queue full; request dropped");
                            return Err(RequestOutcome::Suppressed(SuppressReason::QueueFull));
                        }
                        arbiter.pending.push_back(request);
                    }
                    Admission::Drained => arbiter.pending.push_front(request),
                }
                debug!(%kind, queued = arbiter.pending.len(), "queued behind in-flight utterance");
                return Err(RequestOutcome::Queued);
            }
            if let Some(remaining) = lock_unpoisoned(&self.throttle).remaining(kind) {
                debug!(%kind, remaining_ms = remaining.as_millis() as u64, "throttled");
                return Err(RequestOutcome::Suppressed(SuppressReason::Throttled {
                    remaining,
                }));
            }
        }

        arbiter.in_flight += 1;
        Ok((
            ProcessingPermit {
                orchestrator: Arc::clone(self),
            },
            request,
        ))
    }

    async fn process(self: &Arc<Self>, request: PendingUtterance, admission: Admission) -> RequestOutcome {
        let epoch = self.epoch.load(Ordering::Acquire);
        let (_permit, request) = match self.admit(request, admission) {
            Ok(admitted) => admitted,
            Err(outcome) => return outcome,
        };
        let PendingUtterance {
            input,
            kind,
            producer_payload,
            options,
            ..
        } = request;
        info!(%kind, priority = ?options.priority, force = options.force, "processing utterance");

        // Recorded only once admitted, so dropped requests leave no trace.
        match kind {
            UtteranceKind::Chat => {
                self.add_to_history(HistoryRole::User, &input, producer_payload);
            }
            UtteranceKind::EmotionAware => {
                self.add_to_history(HistoryRole::EmotionContext, &input, producer_payload);
            }
            _ => {}
        }

        let context = self.build_context();
        let generation = GenerationRequest {
            kind,
            prompt: prompts::prompt_for(kind, &input, &context),
            input,
            user: self.user(),
            context,
        };
        let (text, fallback) = match self.backend.generate(generation).await {
            Ok(reply) if !reply.text.trim().is_empty() => (reply.text.trim().to_string(), false),
            Ok(_) => {
                warn!(%kind, "backend returned no text; using fallback line");
                (prompts::fallback_line(kind).to_string(), true)
            }
            Err(e) => {
                warn!(%kind, "generation failed, using fallback line: {e}");
                (prompts::fallback_line(kind).to_string(), true)
            }
        };

        if self.epoch.load(Ordering::Acquire) != epoch {
            info!(%kind, "reset during generation; reply discarded");
            return RequestOutcome::Suppressed(SuppressReason::SessionReset);
        }
        self.add_to_history(
            HistoryRole::Assistant,
            &text,
            json!({ "kind": kind, "fallback": fallback }),
        );

        let source = options.source.unwrap_or_else(|| kind.default_source());
        let holds_reply = options.priority == Priority::High && !options.force;
        let speech = loop {
            if holds_reply {
                if self.wait_for_output(source).await {
                    tokio::time::sleep(self.config.settle_delay()).await;
                }
                if self.epoch.load(Ordering::Acquire) != epoch {
                    info!(%kind, "reset while waiting for audio; reply discarded");
                    return RequestOutcome::Suppressed(SuppressReason::SessionReset);
                }
            }
            let speech = self.speak_on(source, &text, options).await;
            if holds_reply && speech == SpeakOutcome::Rejected(RejectReason::ResourceBusy) {
                debug!(%kind, %source, "lost the audio output; retrying");
                tokio::time::sleep(self.config.settle_delay()).await;
                continue;
            }
            break speech;
        };
        lock_unpoisoned(&self.throttle).record(kind);
        info!(%kind, %source, ?speech, "utterance finished");

        if let SpeakOutcome::Rejected(reason) = speech {
            return RequestOutcome::Suppressed(SuppressReason::ChannelRejected(reason));
        }
        RequestOutcome::Spoken {
            text,
            fallback,
            speech,
        }
    }

    /// Wait until nothing `source` may not interrupt is audible.
    ///
    /// Returns whether it had to wait.
    async fn wait_for_output(&self, source: SpeechSourceId) -> bool {
        let mut speech = self.registry.subscribe();
        let mut waited = false;
        loop {
            let blocked = speech
                .borrow_and_update()
                .active_sources
                .iter()
                .any(|active| *active != SpeechSourceId::Avatar || source == SpeechSourceId::Avatar);
            if !blocked {
                return waited;
            }
            if !waited {
                info!(%source, "audio output busy; holding reply");
                waited = true;
            }
            if speech.changed().await.is_err() {
                return waited;
            }
        }
    }

    async fn speak_on(&self, source: SpeechSourceId, text: &str, options: RequestOptions) -> SpeakOutcome {
        let Some(channel) = self.channel(source) else {
            warn!(%source, "no channel for source");
            return SpeakOutcome::Failed(format!("no channel for {source}"));
        };
        if options.priority == Priority::High && source != SpeechSourceId::Avatar {
            self.yield_avatar(source);
        }
        channel
            .speak(text, SpeakOptions { force: options.force }, SpeakHooks::new())
            .await
    }

    /// High-priority speech may interrupt the avatar, but no other source.
    fn yield_avatar(&self, source: SpeechSourceId) {
        if !self.registry.snapshot().is_active(SpeechSourceId::Avatar) {
            return;
        }
        if let Some(avatar) = self.channel(SpeechSourceId::Avatar) {
            info!(%source, "interrupting avatar speech");
            avatar.cancel();
        }
    }

    fn release(self: &Arc<Self>) {
        let schedule = {
            let mut arbiter = lock_unpoisoned(&self.arbiter);
            arbiter.in_flight = arbiter.in_flight.saturating_sub(1);
            let schedule = arbiter.in_flight == 0 && !arbiter.pending.is_empty() && !arbiter.draining;
            if schedule {
                arbiter.draining = true;
            }
            schedule
        };
        if schedule {
            self.spawn_drain();
        }
    }

    fn spawn_drain(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move { this.drain_pending().await });
            }
            Err(_) => {
                warn!("no async runtime; queued utterances stay pending");
                lock_unpoisoned(&self.arbiter).draining = false;
            }
        }
    }

    /// Claim the drain role if nothing else will schedule it.
    fn claim_drain(&self) -> bool {
        let mut arbiter = lock_unpoisoned(&self.arbiter);
        if arbiter.draining || arbiter.in_flight > 0 || arbiter.pending.is_empty() {
            return false;
        }
        arbiter.draining = true;
        true
    }

    async fn drain_pending(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.settle_delay()).await;
            let next = {
                let mut arbiter = lock_unpoisoned(&self.arbiter);
                arbiter.draining = false;
                if arbiter.in_flight > 0 {
                    // The in-flight request reschedules the drain on release.
                    None
                } else {
                    arbiter.pending.pop_front()
                }
            };
            let Some(mut request) = next else {
                return;
            };
            if request.kind != UtteranceKind::Chat {
                request.options.priority = Priority::Normal;
            }
            debug!(
                kind = %request.kind,
                waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
                "draining queued utterance"
            );
            let outcome = self.process(request, Admission::Drained).await;
            // Spoken and Queued both leave a permit holder that reschedules us.
            if !matches!(outcome, RequestOutcome::Suppressed(_)) || !self.claim_drain() {
                return;
            }
        }
    }

    // --- producer helpers ------------------------------------------------

    /// Reply to a chat message. Counts as user activity.
    pub async fn send_chat(self: &Arc<Self>, message: &str) -> RequestOutcome {
        self.activity.record_activity();
        self.request_utterance(UtteranceKind::Chat, message, Value::Null, RequestOptions::high())
            .await
    }

    /// One greeting per session, and only into silence.
    pub async fn handle_greeting(self: &Arc<Self>) -> RequestOutcome {
        if !self.greeting_enabled {
            return RequestOutcome::Suppressed(SuppressReason::GreetingDisabled);
        }
        if self.has_greeted() {
            return RequestOutcome::Suppressed(SuppressReason::AlreadyGreeted);
        }
        if self.is_processing() || self.registry.is_any_speaking() {
            debug!("greeting skipped: busy");
            return RequestOutcome::Suppressed(SuppressReason::ResourceBusy);
        }
        if self
            .has_greeted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return RequestOutcome::Suppressed(SuppressReason::AlreadyGreeted);
        }
        info!("greeting learner");
        let input = prompts::greeting_input(&self.user());
        self.request_utterance(UtteranceKind::Greeting, input, Value::Null, RequestOptions::high())
            .await
    }

    /// Idle remark, if the tracker says the avatar may speak up.
    pub async fn handle_idle(self: &Arc<Self>) -> RequestOutcome {
        if !self.activity.can_be_idle() {
            return RequestOutcome::Suppressed(SuppressReason::NotIdle);
        }
        self.request_utterance(
            UtteranceKind::Idle,
            prompts::idle_input(),
            Value::Null,
            RequestOptions::default(),
        )
        .await
    }

    /// Record a camera reading and react to it if it is notable.
    pub async fn handle_emotion(self: &Arc<Self>, reading: EmotionContext) -> RequestOutcome {
        self.activity.set_emotion(reading.clone());
        if !emotion::is_actionable(&reading, self.emotion_floor) {
            debug!(emotion = %reading.emotion, confidence = reading.confidence, "emotion reading not actionable");
            return RequestOutcome::Suppressed(SuppressReason::EmotionNotActionable);
        }
        if let Some(remaining) = lock_unpoisoned(&self.throttle).remaining(UtteranceKind::EmotionAware) {
            return RequestOutcome::Suppressed(SuppressReason::Throttled { remaining });
        }

        let input = prompts::emotion_input(&reading);
        let payload = serde_json::to_value(&reading).unwrap_or(Value::Null);
        self.request_utterance(UtteranceKind::EmotionAware, input, payload, RequestOptions::default())
            .await
    }

    /// Speak producer-supplied text verbatim on `source`, bypassing generation.
    pub async fn narrate(&self, source: SpeechSourceId, text: &str, force: bool) -> SpeakOutcome {
        let Some(channel) = self.channel(source) else {
            warn!(%source, "no channel for source");
            return SpeakOutcome::Failed(format!("no channel for {source}"));
        };
        if !text.trim().is_empty() {
            self.add_to_history(
                HistoryRole::Assistant,
                text.trim(),
                json!({ "source": source, "narration": true }),
            );
        }
        channel.speak(text, SpeakOptions { force }, SpeakHooks::new()).await
    }
}
