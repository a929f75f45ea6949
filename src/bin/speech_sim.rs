//! Headless session driver: type chat messages on stdin, watch the
//! arbitration decisions in the log.
//!
//! Usage: `tutor-voice-sim [config.toml]`
//!
//! Lines starting with `/` are commands:
//! `/lesson <text>`, `/feedback <text>`, `/mute`, `/unmute`, `/history`, `/quit`.
//! Anything else is sent as a chat message.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tutor_voice::playback::SimulatedSink;
use tutor_voice::tts::HttpSynthesizer;
use tutor_voice::{HttpConversationBackend, SpeechConfig, SpeechSession, SpeechSourceId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SpeechConfig::default_config_path);
    let config = if path.exists() {
        tracing::info!(path = %path.display(), "loading config");
        SpeechConfig::from_file(&path)?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        SpeechConfig::default()
    };

    let backend = HttpConversationBackend::from_config(&config.backend)
        .map_err(|e| anyhow::anyhow!("cannot start without a backend: {e}"))?;
    let mut builder = SpeechSession::builder(config.clone())
        .with_backend(Arc::new(backend))
        .with_sink(Arc::new(SimulatedSink::new()));
    if let Some(remote) = HttpSynthesizer::from_config(&config.tts)? {
        builder = builder.with_synthesizer(Arc::new(remote));
    }
    let session = builder.build()?;
    session.start()?;

    let greeting = session.orchestrator().handle_greeting().await;
    tracing::info!(?greeting, "greeting");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        session.activity().record_activity();

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" => break,
            "/mute" => session.set_avatar_muted(true),
            "/unmute" => session.set_avatar_muted(false),
            "/lesson" | "/feedback" => {
                let source = if command == "/lesson" {
                    SpeechSourceId::Lesson
                } else {
                    SpeechSourceId::Feedback
                };
                let outcome = session.orchestrator().narrate(source, rest, false).await;
                tracing::info!(%source, ?outcome, "narration");
            }
            "/history" => {
                for entry in session.orchestrator().recent_history(20) {
                    println!("[{:?}] {}", entry.role, entry.content);
                }
            }
            _ => {
                let orchestrator = Arc::clone(session.orchestrator());
                let message = line.to_string();
                tokio::spawn(async move {
                    let outcome = orchestrator.send_chat(&message).await;
                    tracing::info!(?outcome, "chat");
                });
            }
        }
    }

    session.shutdown().await;
    tracing::info!("tutor-voice-sim shut down cleanly");
    Ok(())
}
