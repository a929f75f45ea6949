//! Process-wide bookkeeping of which speech sources are audible.
//!
//! The registry is a primitive: it records membership and publishes
//! snapshots. Deciding who may speak is left to the channels and the
//! orchestrator.

use crate::types::SpeechSourceId;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Immutable view of the shared speaking state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpeechSnapshot {
    /// Sources currently speaking, in registration order. No duplicates.
    pub active_sources: Vec<SpeechSourceId>,
}

impl SpeechSnapshot {
    pub fn is_any_speaking(&self) -> bool {
        !self.active_sources.is_empty()
    }

    /// The first-registered active source, if any.
    pub fn primary_source(&self) -> Option<SpeechSourceId> {
        self.active_sources.first().copied()
    }

    pub fn is_active(&self, source: SpeechSourceId) -> bool {
        self.active_sources.contains(&source)
    }
}

/// Ordered set of active speech sources, observable through a watch channel.
#[derive(Debug)]
pub struct SpeechRegistry {
    state: watch::Sender<SpeechSnapshot>,
}

impl Default for SpeechRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechRegistry {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SpeechSnapshot::default());
        Self { state }
    }

    /// Mark `source` as speaking. Repeated calls keep a single entry.
    pub fn register(&self, source: SpeechSourceId) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.is_active(source) {
                debug!(%source, "register: already active");
                return false;
            }
            snapshot.active_sources.push(source);
            debug!(%source, active = snapshot.active_sources.len(), "speech source registered");
            true
        });
    }

    /// Register `source` only if no other source is active.
    ///
    /// Returns `true` when `source` is active afterwards.
    pub fn try_register(&self, source: SpeechSourceId) -> bool {
        let mut acquired = false;
        self.state.send_if_modified(|snapshot| {
            if snapshot.is_active(source) {
                acquired = true;
                return false;
            }
            if snapshot.is_any_speaking() {
                debug!(
                    %source,
                    holder = ?snapshot.primary_source(),
                    "try_register: resource busy"
                );
                return false;
            }
            snapshot.active_sources.push(source);
            acquired = true;
            debug!(%source, "speech source registered");
            true
        });
        acquired
    }

    /// Remove `source`. Removing an inactive source is a no-op.
    pub fn unregister(&self, source: SpeechSourceId) {
        self.state.send_if_modified(|snapshot| {
            let before = snapshot.active_sources.len();
            snapshot.active_sources.retain(|s| *s != source);
            let removed = snapshot.active_sources.len() != before;
            if removed {
                debug!(%source, active = snapshot.active_sources.len(), "speech source unregistered");
            }
            removed
        });
    }

    pub fn snapshot(&self) -> SpeechSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_any_speaking(&self) -> bool {
        self.state.borrow().is_any_speaking()
    }

    /// Subscribe to membership changes.
    pub fn subscribe(&self) -> watch::Receiver<SpeechSnapshot> {
        self.state.subscribe()
    }
}
