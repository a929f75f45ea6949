//! End-to-end session behaviour on a paused clock.

use crate::helpers::{EchoBackend, harness};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tutor_voice::activity::IN_LESSON;
use tutor_voice::orchestrator::prompts;
use tutor_voice::{
    RequestOutcome, SpeakOutcome, SpeechConfig, SpeechSourceId, SuppressReason, UtteranceKind,
};

#[tokio::test(start_paused = true)]
async fn greeting_then_chat() {
    let h = harness(SpeechConfig::default(), EchoBackend::default());
    h.session.start().unwrap();

    let greeting = h.session.orchestrator().handle_greeting().await;
    assert!(greeting.is_spoken());
    let chat = h.session.orchestrator().send_chat("Can we do fractions?").await;
    assert!(chat.is_spoken());

    assert_eq!(h.backend.kinds(), vec![UtteranceKind::Greeting, UtteranceKind::Chat]);
    assert_eq!(h.voice.spoken()[1], "re: Can we do fractions?");
    assert_eq!(
        h.session.orchestrator().handle_greeting().await,
        RequestOutcome::Suppressed(SuppressReason::AlreadyGreeted)
    );
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn chat_sent_during_idle_remark_waits_its_turn() {
    let h = harness(SpeechConfig::default(), EchoBackend::default());
    h.session.start().unwrap();

    // The idle loop checks every 30s; the learner counts as idle after 60s.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.session.registry().snapshot().is_active(SpeechSourceId::Avatar));

    let outcome = h.session.orchestrator().send_chat("hi").await;
    assert_eq!(outcome, RequestOutcome::Queued);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.backend.kinds(), vec![UtteranceKind::Idle, UtteranceKind::Chat]);
    assert_eq!(h.voice.spoken().last().map(String::as_str), Some("re: hi"));
    assert_eq!(h.sink.max_active.load(Ordering::SeqCst), 1);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn producers_never_overlap() {
    let h = harness(SpeechConfig::default(), EchoBackend::default());
    let orchestrator = Arc::clone(h.session.orchestrator());

    let greeting = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.handle_greeting().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let lesson = orchestrator
        .narrate(SpeechSourceId::Lesson, "Chapter two: verbs.", false)
        .await;
    let feedback = orchestrator
        .narrate(SpeechSourceId::Feedback, "Correct!", false)
        .await;
    let queued = orchestrator.send_chat("what's a verb?").await;

    assert!(matches!(lesson, SpeakOutcome::Rejected(_)));
    assert!(matches!(feedback, SpeakOutcome::Rejected(_)));
    assert_eq!(queued, RequestOutcome::Queued);
    assert!(greeting.await.unwrap().is_spoken());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.sink.max_active.load(Ordering::SeqCst), 1);
    assert!(!h.session.registry().is_any_speaking());
}

#[tokio::test(start_paused = true)]
async fn backend_outage_is_audible() {
    let h = harness(
        SpeechConfig::default(),
        EchoBackend {
            fail: true,
            ..EchoBackend::default()
        },
    );

    let outcome = h.session.orchestrator().send_chat("are you there?").await;
    let expected = prompts::fallback_line(UtteranceKind::Chat);
    assert_eq!(
        outcome,
        RequestOutcome::Spoken {
            text: expected.to_string(),
            fallback: true,
            speech: SpeakOutcome::Finished,
        }
    );
    assert_eq!(h.voice.spoken(), vec![expected.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn lesson_mode_suppresses_idle_chatter() {
    let h = harness(SpeechConfig::default(), EchoBackend::default());
    h.session.start().unwrap();
    let lesson = h.session.enter_context(IN_LESSON);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(h.backend.kinds().is_empty());

    drop(lesson);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.backend.kinds(), vec![UtteranceKind::Idle]);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn presence_watch_reports_idle_learner() {
    let h = harness(SpeechConfig::default(), EchoBackend::default());
    let mut presence = h.session.activity().subscribe_presence();
    h.session.start().unwrap();

    presence.changed().await.unwrap();
    assert!(!*presence.borrow_and_update());
    assert!(h.session.activity().time_since_activity() >= Duration::from_secs(60));

    h.session.activity().record_activity();
    assert!(*presence.borrow_and_update());
    h.session.shutdown().await;
}
