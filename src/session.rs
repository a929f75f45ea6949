//! One tutoring session: the shared registry, tracker, channels and
//! orchestrator, plus the background tasks that drive them.

use crate::activity::{ActivityTracker, ContextFlagGuard};
use crate::backend::ConversationBackend;
use crate::channel::SpeechChannel;
use crate::config::SpeechConfig;
use crate::emotion::EmotionClassifier;
use crate::error::{Result, SpeechError};
use crate::lock_unpoisoned;
use crate::orchestrator::{Orchestrator, RequestOutcome};
use crate::playback::{AudioSink, SimulatedSink};
use crate::registry::{SpeechRegistry, SpeechSnapshot};
use crate::tts::{PlaceholderVoice, SpeechSynthesizer, SynthesisCache, SynthesisChain};
use crate::types::SpeechSourceId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collects collaborators for a [`SpeechSession`].
pub struct SpeechSessionBuilder {
    config: SpeechConfig,
    backend: Option<Arc<dyn ConversationBackend>>,
    synthesizers: Vec<Arc<dyn SpeechSynthesizer>>,
    sink: Option<Arc<dyn AudioSink>>,
    classifier: Option<Arc<dyn EmotionClassifier>>,
}

impl SpeechSessionBuilder {
    /// Text-generation backend. Required.
    pub fn with_backend(mut self, backend: Arc<dyn ConversationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Append a synthesizer to the fallback chain. Order matters.
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizers.push(synthesizer);
        self
    }

    /// Audio output. Defaults to [`SimulatedSink`].
    pub fn with_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enable the emotion poller.
    pub fn with_emotion_classifier(mut self, classifier: Arc<dyn EmotionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Wire everything together.
    ///
    /// When no on-device synthesizer was supplied, [`PlaceholderVoice`] is
    /// appended so the chain always has a last resort.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or no backend was given.
    pub fn build(self) -> Result<SpeechSession> {
        self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| SpeechError::Session("no conversation backend configured".into()))?;

        let mut synthesizers = self.synthesizers;
        if !synthesizers.iter().any(|s| s.is_on_device()) {
            synthesizers.push(Arc::new(PlaceholderVoice::default()));
        }
        let chain = SynthesisChain::new(synthesizers).with_cache(SynthesisCache::new(
            self.config.tts.cache_ttl(),
            self.config.tts.cache_max_entries,
        ));
        info!(providers = ?chain.provider_names(), "speech synthesis chain ready");
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(chain);
        let sink = self.sink.unwrap_or_else(|| Arc::new(SimulatedSink::new()));

        let registry = Arc::new(SpeechRegistry::new());
        let activity = Arc::new(ActivityTracker::new(
            self.config.activity.clone(),
            &self.config.avatar,
            Arc::clone(&registry),
        ));
        let channels: HashMap<SpeechSourceId, Arc<SpeechChannel>> = SpeechSourceId::ALL
            .iter()
            .map(|source| {
                let channel = Arc::new(SpeechChannel::new(
                    *source,
                    Arc::clone(&registry),
                    Arc::clone(&synthesizer),
                    Arc::clone(&sink),
                ));
                (*source, channel)
            })
            .collect();
        if self.config.avatar.muted {
            if let Some(avatar) = channels.get(&SpeechSourceId::Avatar) {
                avatar.set_muted(true);
            }
        }

        let orchestrator = Arc::new(Orchestrator::new(
            &self.config,
            Arc::clone(&registry),
            Arc::clone(&activity),
            channels.values().cloned(),
            backend,
        ));

        Ok(SpeechSession {
            config: self.config,
            registry,
            activity,
            channels,
            orchestrator,
            classifier: self.classifier,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }
}

/// Explicit per-session context shared by every producer.
pub struct SpeechSession {
    config: SpeechConfig,
    registry: Arc<SpeechRegistry>,
    activity: Arc<ActivityTracker>,
    channels: HashMap<SpeechSourceId, Arc<SpeechChannel>>,
    orchestrator: Arc<Orchestrator>,
    classifier: Option<Arc<dyn EmotionClassifier>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl std::fmt::Debug for SpeechSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechSession")
            .field("speaking", &self.registry.snapshot().active_sources)
            .field("orchestrator", &self.orchestrator)
            .field("started", &self.started.load(Ordering::Acquire))
            .finish()
    }
}

impl SpeechSession {
    pub fn builder(config: SpeechConfig) -> SpeechSessionBuilder {
        SpeechSessionBuilder {
            config,
            backend: None,
            synthesizers: Vec::new(),
            sink: None,
            classifier: None,
        }
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SpeechRegistry> {
        &self.registry
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn channel(&self, source: SpeechSourceId) -> Option<&Arc<SpeechChannel>> {
        self.channels.get(&source)
    }

    pub fn subscribe_speech(&self) -> watch::Receiver<SpeechSnapshot> {
        self.registry.subscribe()
    }

    /// Mute or unmute the avatar. Muting silences it immediately.
    pub fn set_avatar_muted(&self, muted: bool) {
        self.activity.set_avatar_muted(muted);
        if let Some(avatar) = self.channels.get(&SpeechSourceId::Avatar) {
            avatar.set_muted(muted);
        }
        info!(muted, "avatar mute changed");
    }

    /// Mark a UI mode as entered for as long as the guard lives.
    pub fn enter_context(&self, name: &str) -> ContextFlagGuard {
        self.activity.enter_context(name)
    }

    /// Spawn the background tasks. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was already started or shut down.
    pub fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SpeechError::Session("session already shut down".into()));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SpeechError::Session("session already started".into()));
        }

        let mut tasks = vec![
            self.activity.spawn_presence_watch(self.cancel.child_token()),
            self.spawn_idle_loop(),
            self.spawn_maintenance(),
        ];
        if let Some(classifier) = &self.classifier {
            tasks.push(self.spawn_emotion_poller(Arc::clone(classifier)));
        }
        info!(tasks = tasks.len(), "speech session started");
        lock_unpoisoned(&self.tasks).extend(tasks);
        Ok(())
    }

    /// Stop background work, silence every channel and forget session state.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for channel in self.channels.values() {
            channel.cancel();
        }
        let tasks: Vec<JoinHandle<()>> = lock_unpoisoned(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("session task ended abnormally: {e}");
            }
        }
        self.activity.clear_context_flags();
        self.orchestrator.reset();
        info!("speech session shut down");
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn spawn_idle_loop(&self) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let cancel = self.cancel.child_token();
        let period = Duration::from_secs(self.config.avatar.idle_check_interval_secs);
        tokio::spawn(async move {
            let mut ticker = Self::ticker(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = orchestrator.handle_idle() => {
                        if let RequestOutcome::Suppressed(reason) = outcome {
                            debug!(?reason, "idle remark skipped");
                        }
                    }
                }
            }
            debug!("idle loop stopped");
        })
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let activity = Arc::clone(&self.activity);
        let cancel = self.cancel.child_token();
        let period = self.config.orchestrator.maintenance_interval();
        tokio::spawn(async move {
            let mut ticker = Self::ticker(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        orchestrator.purge_history();
                        activity.sweep_stale_flags();
                    }
                }
            }
            debug!("maintenance task stopped");
        })
    }

    fn spawn_emotion_poller(&self, classifier: Arc<dyn EmotionClassifier>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let cancel = self.cancel.child_token();
        let period = Duration::from_secs(self.config.emotion.poll_interval_secs);
        tokio::spawn(async move {
            let mut ticker = Self::ticker(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let reading = tokio::select! {
                    _ = cancel.cancelled() => break,
                    reading = classifier.classify() => reading,
                };
                let reading = match reading {
                    Ok(Some(reading)) => reading,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("emotion classifier failed: {e}");
                        continue;
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = orchestrator.handle_emotion(reading.into_context()) => {
                        debug!(spoken = outcome.is_spoken(), "emotion reading handled");
                    }
                }
            }
            debug!("emotion poller stopped");
        })
    }
}
