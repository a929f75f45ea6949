//! Config files on disk driving a real session.

use crate::helpers::{EchoBackend, harness};
use tutor_voice::{RequestOutcome, SpeechConfig, SpeechError, SpeechSourceId, SuppressReason};

#[test]
fn default_path_is_namespaced() {
    let path = SpeechConfig::default_config_path();
    assert!(path.ends_with("tutor-voice/config.toml"), "got {}", path.display());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SpeechConfig::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(SpeechError::Io(_))));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[avatar\nmuted = yes").unwrap();
    assert!(matches!(
        SpeechConfig::from_file(&path),
        Err(SpeechError::Config(_))
    ));
}

#[test]
fn saved_file_is_readable_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tutor-voice").join("config.toml");
    let mut config = SpeechConfig::default();
    config.user.display_name = Some("Ada".into());
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[avatar]"));
    assert!(text.contains("display_name = \"Ada\""));
}

#[tokio::test(start_paused = true)]
async fn file_settings_reach_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[avatar]\nmuted = true\ngreeting_enabled = false\n\n[user]\ndisplay_name = \"Ada\"\n",
    )
    .unwrap();

    let config = SpeechConfig::from_file(&path).unwrap();
    let h = harness(config, EchoBackend::default());

    assert!(h.session.channel(SpeechSourceId::Avatar).unwrap().is_muted());
    assert_eq!(h.session.orchestrator().user().display_name.as_deref(), Some("Ada"));
    assert_eq!(
        h.session.orchestrator().handle_greeting().await,
        RequestOutcome::Suppressed(SuppressReason::GreetingDisabled)
    );
    assert!(h.backend.kinds().is_empty());
}
