//! HTTP synthesizer contract and fallback-chain behaviour against a live mock.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tutor_voice::config::TtsConfig;
use tutor_voice::tts::{
    AudioEncoding, HttpSynthesizer, PlaceholderVoice, SpeechSynthesizer, SynthesisCache,
    SynthesisChain,
};
use tutor_voice::SpeechError;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn synthesizer(server: &MockServer) -> HttpSynthesizer {
    let config = TtsConfig {
        endpoint: Some(format!("{}/tts", server.uri())),
        api_key: Some("tts-key".into()),
        voice: Some("warm".into()),
        ..TtsConfig::default()
    };
    HttpSynthesizer::from_config(&config).unwrap().unwrap()
}

#[tokio::test]
async fn posts_text_and_voice_and_reads_encoding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(header("authorization", "Bearer tts-key"))
        .and(body_json(json!({"text": "Well done!", "voice": "warm"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/wav")
                .set_body_bytes(b"RIFF0000WAVE".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let audio = synthesizer(&server).synthesize("Well done!").await.unwrap();
    assert_eq!(audio.encoding, AudioEncoding::Wav);
    assert_eq!(&audio.bytes[..], b"RIFF0000WAVE");
}

#[tokio::test]
async fn error_status_is_a_synthesis_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = synthesizer(&server).synthesize("hello").await.unwrap_err();
    match err {
        SpeechError::Synthesis(message) => assert!(message.contains("503"), "got: {message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_audio_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "audio/mpeg"))
        .mount(&server)
        .await;

    assert!(synthesizer(&server).synthesize("hello").await.is_err());
}

#[tokio::test]
async fn chain_falls_back_to_on_device_voice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let providers: Vec<Arc<dyn SpeechSynthesizer>> = vec![
        Arc::new(synthesizer(&server)),
        Arc::new(PlaceholderVoice::default()),
    ];
    let chain = SynthesisChain::new(providers);
    let audio = chain.synthesize("Let's try that again").await.unwrap();
    assert!(matches!(audio.encoding, AudioEncoding::Pcm16 { .. }));
}

#[tokio::test]
async fn chain_caches_remote_phrases() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mpeg")
                .set_body_bytes(b"ID3audio".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let providers: Vec<Arc<dyn SpeechSynthesizer>> = vec![
        Arc::new(synthesizer(&server)),
        Arc::new(PlaceholderVoice::default()),
    ];
    let chain = SynthesisChain::new(providers)
        .with_cache(SynthesisCache::new(Duration::from_secs(3600), 16));

    let first = chain.synthesize("Nice work!").await.unwrap();
    let second = chain.synthesize("Nice work!").await.unwrap();
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(chain.cache().unwrap().len(), 1);
}
