//! User activity, presence and context flag tracking.
//!
//! Interaction signals reset a debounced idle deadline. Context flags
//! describe which UI mode the learner is in ("in lesson", "in chat") and
//! suppress unprompted avatar speech while set. Plain flags expire after a
//! TTL so a producer that vanished without clearing its flag cannot mute the
//! avatar forever; flags held through a [`ContextFlagGuard`] never expire and
//! are cleared when the guard drops.

use crate::config::{ActivityConfig, AvatarConfig};
use crate::lock_unpoisoned;
use crate::registry::SpeechRegistry;
use crate::types::EmotionContext;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Flag set while a lesson block is on screen.
pub const IN_LESSON: &str = "isInLesson";
/// Flag set while the chat panel is open.
pub const IN_CHAT: &str = "isInChat";

#[derive(Debug, Clone, Copy)]
struct FlagEntry {
    value: bool,
    set_at: Instant,
    /// Number of live guards holding this flag.
    pins: usize,
}

impl FlagEntry {
    fn is_set(&self, ttl: Duration, now: Instant) -> bool {
        self.pins > 0 || (self.value && now.duration_since(self.set_at) < ttl)
    }
}

#[derive(Debug)]
struct ActivityState {
    last_activity: Instant,
    user_active: bool,
    flags: HashMap<String, FlagEntry>,
    avatar_muted: bool,
    idle_responses: bool,
    emotion: Option<EmotionContext>,
}

/// Rolling view of what the learner is doing.
#[derive(Debug)]
pub struct ActivityTracker {
    config: ActivityConfig,
    registry: Arc<SpeechRegistry>,
    state: Mutex<ActivityState>,
    activity_tx: watch::Sender<Instant>,
    presence_tx: watch::Sender<bool>,
}

impl ActivityTracker {
    pub fn new(config: ActivityConfig, avatar: &AvatarConfig, registry: Arc<SpeechRegistry>) -> Self {
        let now = Instant::now();
        let (activity_tx, _) = watch::channel(now);
        let (presence_tx, _) = watch::channel(true);
        Self {
            config,
            registry,
            state: Mutex::new(ActivityState {
                last_activity: now,
                user_active: true,
                flags: HashMap::new(),
                avatar_muted: avatar.muted,
                idle_responses: avatar.idle_responses,
                emotion: None,
            }),
            activity_tx,
            presence_tx,
        }
    }

    /// Record a qualifying interaction (pointer, key, touch).
    ///
    /// Restarts the idle deadline; repeated calls debounce rather than stack.
    pub fn record_activity(&self) {
        let now = Instant::now();
        {
            let mut state = lock_unpoisoned(&self.state);
            state.last_activity = now;
            state.user_active = true;
        }
        self.activity_tx.send_replace(now);
        self.presence_tx.send_if_modified(|active| {
            let changed = !*active;
            *active = true;
            changed
        });
    }

    pub fn last_activity(&self) -> Instant {
        lock_unpoisoned(&self.state).last_activity
    }

    pub fn time_since_activity(&self) -> Duration {
        Instant::now().duration_since(self.last_activity())
    }

    /// Whether the learner interacted within the idle threshold.
    pub fn is_user_active(&self) -> bool {
        let state = lock_unpoisoned(&self.state);
        state.user_active
            && Instant::now().duration_since(state.last_activity) < self.config.idle_threshold()
    }

    /// Whether the learner interacted within `window`.
    pub fn is_active_within(&self, window: Duration) -> bool {
        self.time_since_activity() < window
    }

    /// Set a named context flag. Unguarded flags expire after the configured TTL.
    pub fn set_context_flag(&self, name: &str, value: bool) {
        let mut state = lock_unpoisoned(&self.state);
        if value {
            let now = Instant::now();
            state
                .flags
                .entry(name.to_owned())
                .and_modify(|entry| {
                    entry.value = true;
                    entry.set_at = now;
                })
                .or_insert(FlagEntry {
                    value: true,
                    set_at: now,
                    pins: 0,
                });
        } else {
            state.flags.remove(name);
        }
        debug!(flag = name, value, "context flag set");
    }

    /// Set a context flag for as long as the returned guard lives.
    pub fn enter_context(self: &Arc<Self>, name: &str) -> ContextFlagGuard {
        {
            let mut state = lock_unpoisoned(&self.state);
            let now = Instant::now();
            let entry = state.flags.entry(name.to_owned()).or_insert(FlagEntry {
                value: true,
                set_at: now,
                pins: 0,
            });
            entry.pins += 1;
        }
        debug!(flag = name, "context entered");
        ContextFlagGuard {
            tracker: Arc::clone(self),
            name: name.to_owned(),
        }
    }

    fn release_pin(&self, name: &str) {
        let mut state = lock_unpoisoned(&self.state);
        let Some(entry) = state.flags.get_mut(name) else {
            return;
        };
        entry.pins = entry.pins.saturating_sub(1);
        if entry.pins == 0 {
            state.flags.remove(name);
            debug!(flag = name, "context left");
        }
    }

    pub fn context_flag(&self, name: &str) -> bool {
        let state = lock_unpoisoned(&self.state);
        let now = Instant::now();
        state
            .flags
            .get(name)
            .is_some_and(|entry| entry.is_set(self.config.context_flag_ttl(), now))
    }

    /// Effective value of every known flag.
    pub fn context_flags(&self) -> BTreeMap<String, bool> {
        let state = lock_unpoisoned(&self.state);
        let now = Instant::now();
        let ttl = self.config.context_flag_ttl();
        state
            .flags
            .iter()
            .map(|(name, entry)| (name.clone(), entry.is_set(ttl, now)))
            .collect()
    }

    pub fn any_context_flag(&self) -> bool {
        self.context_flags().values().any(|set| *set)
    }

    /// Drop unguarded flags older than the TTL. Returns the names removed.
    pub fn sweep_stale_flags(&self) -> Vec<String> {
        let mut state = lock_unpoisoned(&self.state);
        let now = Instant::now();
        let ttl = self.config.context_flag_ttl();
        let stale: Vec<String> = state
            .flags
            .iter()
            .filter(|(_, entry)| !entry.is_set(ttl, now))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            state.flags.remove(name);
            warn!(flag = name.as_str(), "context flag expired without being cleared");
        }
        stale
    }

    pub fn clear_context_flags(&self) {
        lock_unpoisoned(&self.state).flags.clear();
    }

    pub fn set_avatar_muted(&self, muted: bool) {
        lock_unpoisoned(&self.state).avatar_muted = muted;
    }

    pub fn avatar_muted(&self) -> bool {
        lock_unpoisoned(&self.state).avatar_muted
    }

    pub fn set_idle_responses(&self, enabled: bool) {
        lock_unpoisoned(&self.state).idle_responses = enabled;
    }

    pub fn idle_responses_enabled(&self) -> bool {
        lock_unpoisoned(&self.state).idle_responses
    }

    /// Replace the last known emotion reading.
    pub fn set_emotion(&self, emotion: EmotionContext) {
        lock_unpoisoned(&self.state).emotion = Some(emotion);
    }

    pub fn emotion(&self) -> Option<EmotionContext> {
        lock_unpoisoned(&self.state).emotion.clone()
    }

    /// Whether the avatar has earned the right to speak up unprompted.
    pub fn can_be_idle(&self) -> bool {
        if self.registry.is_any_speaking() || self.any_context_flag() {
            return false;
        }
        let state = lock_unpoisoned(&self.state);
        let idle_for = Instant::now().duration_since(state.last_activity);
        !state.avatar_muted
            && state.idle_responses
            && idle_for >= self.config.idle_threshold()
    }

    /// Subscribe to active/inactive transitions.
    pub fn subscribe_presence(&self) -> watch::Receiver<bool> {
        self.presence_tx.subscribe()
    }

    fn mark_inactive_if_due(&self) {
        let now = Instant::now();
        let flipped = {
            let mut state = lock_unpoisoned(&self.state);
            let due = now.duration_since(state.last_activity) >= self.config.idle_threshold();
            let flipped = due && state.user_active;
            if due {
                state.user_active = false;
            }
            flipped
        };
        if flipped {
            info!(
                idle_secs = self.config.idle_threshold_secs,
                "user went idle"
            );
            self.presence_tx.send_replace(false);
        }
    }

    /// Spawn the debounced idle watcher.
    ///
    /// Each activity pushes the deadline out; the user is marked inactive once
    /// the deadline passes with no further activity.
    pub fn spawn_presence_watch(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut activity_rx = self.activity_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let deadline = *activity_rx.borrow_and_update() + tracker.config.idle_threshold();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(deadline) => {
                        tracker.mark_inactive_if_due();
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            changed = activity_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    changed = activity_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("presence watcher stopped");
        })
    }
}

/// Keeps a context flag set until dropped.
#[derive(Debug)]
pub struct ContextFlagGuard {
    tracker: Arc<ActivityTracker>,
    name: String,
}

impl ContextFlagGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ContextFlagGuard {
    fn drop(&mut self) {
        self.tracker.release_pin(&self.name);
    }
}
