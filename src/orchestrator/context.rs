//! Conversation context handed to the generation backend.

use crate::activity::{ActivityTracker, IN_CHAT, IN_LESSON};
use crate::history::{ContextSnapshot, ConversationHistoryEntry};
use crate::types::{EmotionContext, HistoryRole, SpeechSourceId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One history entry as the backend sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextMessage {
    pub role: HistoryRole,
    pub content: String,
}

/// Snapshot of history plus tracker state at request time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationContext {
    pub recent_messages: Vec<ContextMessage>,
    /// Active within the follow-up window, which is stricter than the idle threshold.
    pub is_user_active: bool,
    pub seconds_since_activity: u64,
    pub is_in_lesson: bool,
    pub is_in_chat: bool,
    pub flags: BTreeMap<String, bool>,
    pub emotion: Option<EmotionContext>,
    pub speaking: Vec<SpeechSourceId>,
}

impl ConversationContext {
    /// Build from the given history (oldest first) and the tracker's current state.
    pub fn build(
        history: &[Arc<ConversationHistoryEntry>],
        activity: &ActivityTracker,
        speaking: Vec<SpeechSourceId>,
        max_chars: usize,
        follow_up_window: Duration,
    ) -> Self {
        let flags = activity.context_flags();
        Self {
            recent_messages: history
                .iter()
                .map(|entry| ContextMessage {
                    role: entry.role,
                    content: cap_chars(&entry.content, max_chars),
                })
                .collect(),
            is_user_active: activity.is_active_within(follow_up_window),
            seconds_since_activity: activity.time_since_activity().as_secs(),
            is_in_lesson: flags.get(IN_LESSON).copied().unwrap_or(false),
            is_in_chat: flags.get(IN_CHAT).copied().unwrap_or(false),
            flags,
            emotion: activity.emotion(),
            speaking,
        }
    }
}

/// Copy of tracker state stored alongside a history entry.
pub fn snapshot(activity: &ActivityTracker, speaking: Vec<SpeechSourceId>) -> ContextSnapshot {
    ContextSnapshot {
        user_active: activity.is_user_active(),
        flags: activity.context_flags(),
        emotion: activity.emotion(),
        speaking,
    }
}

/// Truncate to `max` characters on a char boundary, marking the cut.
pub(crate) fn cap_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
