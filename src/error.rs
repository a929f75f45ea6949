//! Error types for the speech arbitration layer.
//!
//! These errors only travel across collaborator seams (backend, synthesizer,
//! sink, classifier). Producer-facing entry points convert them into outcome
//! values and never hand them to callers.

/// Top-level error type for collaborators and session setup.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Text-generation backend error (unreachable, bad status, bad body).
    #[error("backend error: {0}")]
    Backend(String),

    /// Speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio playback error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Emotion classifier error.
    #[error("emotion error: {0}")]
    Emotion(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session lifecycle error.
    #[error("session error: {0}")]
    Session(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
