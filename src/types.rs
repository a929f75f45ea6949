//! Value types shared by the registry, channels and orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Producer category competing for the single audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechSourceId {
    /// The virtual character (idle remarks, greetings, emotion reactions).
    Avatar,
    /// Replies to messages typed into the chat panel.
    Chat,
    /// Lesson narration blocks.
    Lesson,
    /// Choice-feedback panel.
    Feedback,
}

impl SpeechSourceId {
    /// Every source, in registration-priority order for display purposes.
    pub const ALL: [SpeechSourceId; 4] = [
        SpeechSourceId::Avatar,
        SpeechSourceId::Chat,
        SpeechSourceId::Lesson,
        SpeechSourceId::Feedback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Chat => "chat",
            Self::Lesson => "lesson",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for SpeechSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of an utterance request; selects prompt, throttle and channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UtteranceKind {
    /// Reply to a user chat message.
    Chat,
    /// Unprompted remark while the user is idle.
    Idle,
    /// Reaction to a camera emotion reading.
    EmotionAware,
    /// One-shot session greeting.
    Greeting,
    /// Generated lesson commentary.
    Lesson,
    /// Generated feedback on a learner's choice.
    Feedback,
}

impl UtteranceKind {
    /// The channel an utterance of this kind is spoken on by default.
    pub fn default_source(self) -> SpeechSourceId {
        match self {
            Self::Chat => SpeechSourceId::Chat,
            Self::Idle | Self::EmotionAware | Self::Greeting => SpeechSourceId::Avatar,
            Self::Lesson => SpeechSourceId::Lesson,
            Self::Feedback => SpeechSourceId::Feedback,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Idle => "idle",
            Self::EmotionAware => "emotion-aware",
            Self::Greeting => "greeting",
            Self::Lesson => "lesson",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for UtteranceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request priority. `High` may pass the "don't speak over others" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Options accepted by `Orchestrator::request_utterance`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Skip queueing and every eligibility rule.
    pub force: bool,
    pub priority: Priority,
    /// Speak on this channel instead of the kind's default one.
    pub source: Option<SpeechSourceId>,
}

impl RequestOptions {
    pub fn high() -> Self {
        Self {
            priority: Priority::High,
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// Role of a conversation history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
    EmotionContext,
}

/// Latest camera reading. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionContext {
    pub emotion: String,
    /// Classifier confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub visual_description: Option<String>,
    pub face_detected: bool,
    pub observed_at: DateTime<Utc>,
}

/// Identity forwarded to the text-generation backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

impl From<&crate::config::UserConfig> for UserInfo {
    fn from(config: &crate::config::UserConfig) -> Self {
        Self {
            id: config.id.clone(),
            display_name: config.display_name.clone(),
        }
    }
}
