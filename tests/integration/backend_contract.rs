//! HTTP text-generation backend contract.

use serde_json::json;
use std::time::Duration;
use tutor_voice::backend::{ConversationBackend, GenerationRequest, HttpConversationBackend};
use tutor_voice::config::BackendConfig;
use tutor_voice::{ConversationContext, SpeechError, UserInfo, UtteranceKind};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(kind: UtteranceKind, input: &str) -> GenerationRequest {
    GenerationRequest {
        kind,
        prompt: format!("prompt for {input}"),
        input: input.to_string(),
        user: UserInfo {
            id: Some("learner-1".into()),
            display_name: Some("Ada".into()),
        },
        context: ConversationContext {
            is_in_lesson: true,
            ..ConversationContext::default()
        },
    }
}

fn backend(server: &MockServer) -> HttpConversationBackend {
    let config = BackendConfig {
        endpoint: Some(format!("{}/generate", server.uri())),
        api_key: Some("secret".into()),
        ..BackendConfig::default()
    };
    HttpConversationBackend::from_config(&config).unwrap()
}

#[tokio::test]
async fn posts_prompt_user_and_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "kind": "chat",
            "input": "what is a noun?",
            "user": {"id": "learner-1", "display_name": "Ada"},
            "context": {"is_in_lesson": true}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "A noun names a person, place or thing."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = backend(&server)
        .generate(request(UtteranceKind::Chat, "what is a noun?"))
        .await
        .unwrap();
    assert_eq!(reply.text, "A noun names a person, place or thing.");
}

#[tokio::test]
async fn accepts_response_field_and_keeps_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Keep going!",
            "model": "tutor-small"
        })))
        .mount(&server)
        .await;

    let reply = backend(&server)
        .generate(request(UtteranceKind::Idle, "nudge"))
        .await
        .unwrap();
    assert_eq!(reply.text, "Keep going!");
    assert_eq!(reply.raw["model"], "tutor-small");
}

#[tokio::test]
async fn error_status_maps_to_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "rate limited"}
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(request(UtteranceKind::Chat, "hi"))
        .await
        .unwrap_err();
    match err {
        SpeechError::Backend(message) => {
            assert!(message.contains("429"), "got: {message}");
            assert!(message.contains("rate limited"), "got: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn body_without_text_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let result = backend(&server)
        .generate(request(UtteranceKind::Chat, "hi"))
        .await;
    assert!(matches!(result, Err(SpeechError::Backend(_))));
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let backend = HttpConversationBackend::new(
        format!("{}/generate", server.uri()),
        Duration::from_millis(200),
    )
    .unwrap();
    let result = backend.generate(request(UtteranceKind::Chat, "hi")).await;
    assert!(matches!(result, Err(SpeechError::Backend(_))));
}
