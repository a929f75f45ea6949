//! Tutor voice: speech arbitration and conversation orchestration for an
//! AI tutor with several independent talking surfaces.
//!
//! Several producers (an animated avatar, a chat panel, lesson narration, a
//! feedback panel) share one audio output. This crate decides who may speak,
//! when, and what they say:
//!
//! - **Registry**: which sources are audible right now
//! - **Activity tracker**: is the learner around, and which UI mode are they in
//! - **Speech channels**: one per source, driving TTS and playback
//! - **Orchestrator**: single entry point for generated utterances (queueing,
//!   throttling, history, fallback lines)
//! - **Session**: owns all of the above plus their background tasks
//!
//! External collaborators (text generation, speech synthesis, audio output,
//! emotion classifier) sit behind traits so hosts can plug in their own.

pub mod activity;
pub mod backend;
pub mod channel;
pub mod config;
pub mod emotion;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod playback;
pub mod registry;
pub mod session;
pub mod throttle;
pub mod tts;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use activity::{ActivityTracker, ContextFlagGuard};
pub use backend::{ConversationBackend, GenerationReply, GenerationRequest, HttpConversationBackend};
pub use channel::{ChannelPhase, SpeakHooks, SpeakOptions, SpeakOutcome, SpeechChannel};
pub use config::SpeechConfig;
pub use error::{Result, SpeechError};
pub use orchestrator::{ConversationContext, Orchestrator, RequestOutcome, SuppressReason};
pub use registry::{SpeechRegistry, SpeechSnapshot};
pub use session::{SpeechSession, SpeechSessionBuilder};
pub use types::{
    EmotionContext, HistoryRole, Priority, RequestOptions, SpeechSourceId, UserInfo,
    UtteranceKind,
};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
