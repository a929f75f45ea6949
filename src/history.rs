//! Conversation history ring.
//!
//! Bounded by entry count and by age. Entries are shared as `Arc` and are
//! never mutated after they are recorded.

use crate::types::{EmotionContext, HistoryRole, SpeechSourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Copy of the tracked context at the moment an entry was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub user_active: bool,
    pub flags: BTreeMap<String, bool>,
    pub emotion: Option<EmotionContext>,
    pub speaking: Vec<SpeechSourceId>,
}

/// A recorded conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistoryEntry {
    pub id: String,
    pub role: HistoryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub context_snapshot: ContextSnapshot,
    pub metadata: serde_json::Value,
}

impl ConversationHistoryEntry {
    pub fn new(
        role: HistoryRole,
        content: impl Into<String>,
        context_snapshot: ContextSnapshot,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            context_snapshot,
            metadata,
        }
    }
}

/// History with fixed capacity and a retention window.
#[derive(Debug)]
pub struct HistoryBuffer {
    /// Entries in insertion order (oldest first), with their monotonic record time.
    entries: VecDeque<(Instant, Arc<ConversationHistoryEntry>)>,
    capacity: usize,
    retention: Duration,
}

impl HistoryBuffer {
    #[must_use]
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Record an entry, evicting the oldest if at capacity.
    pub fn push(&mut self, entry: ConversationHistoryEntry) -> Arc<ConversationHistoryEntry> {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        let entry = Arc::new(entry);
        self.entries.push_back((Instant::now(), Arc::clone(&entry)));
        entry
    }

    /// The last `n` entries, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<Arc<ConversationHistoryEntry>> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries
            .iter()
            .skip(skip)
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }

    /// Remove entries older than the retention window. Returns how many went.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        while let Some((recorded_at, _)) = self.entries.front() {
            if now.duration_since(*recorded_at) >= self.retention {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
