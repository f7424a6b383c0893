use axum::{http::HeaderMap, routing::post, Json, Router};
use callpilot_voice::{HttpSynthesizer, PiperSynthesizer, Synthesizer, VoiceError};
use serde_json::Value;
use std::collections::HashMap;
use tokio::net::TcpListener;

#[test]
fn test_piper_invalid_speed() {
    for speed in [0.0, 0.001, 10.5] {
        match PiperSynthesizer::new("piper", "voice.onnx", speed) {
            Err(VoiceError::Config(msg)) => {
                assert!(msg.contains("between 0.1 and 10.0"), "got: {}", msg)
            }
            other => panic!("Expected Config error about speed, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_piper_missing_model_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let model = temp_dir.path().join("missing.onnx");

    let synth = PiperSynthesizer::new("piper", &model, 1.0).unwrap();
    match synth.synthesize("Hello").await {
        Err(VoiceError::Tts(msg)) => assert!(msg.contains("Model file not found")),
        other => panic!("Expected Tts error about missing model, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_and_oversized_text_rejected() {
    let synth = HttpSynthesizer::new(
        reqwest::Client::new(),
        "http://127.0.0.1:9/tts",
        "default",
        HashMap::new(),
    );
    assert!(matches!(synth.synthesize("   ").await, Err(VoiceError::Tts(_))));

    let huge = "a".repeat(64 * 1024 + 1);
    match synth.synthesize(&huge).await {
        Err(VoiceError::Tts(msg)) => assert!(msg.contains("exceeds maximum size")),
        other => panic!("Expected size error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_synthesizer_posts_text_and_returns_pcm() {
    async fn tts(headers: HeaderMap, Json(body): Json<Value>) -> Vec<u8> {
        assert_eq!(headers["authorization"], "Bearer tts-key");
        assert_eq!(body["text"], "Welcome");
        assert_eq!(body["voice"], "en-US-1");
        assert_eq!(body["sampleRate"], 16000);
        vec![1, 0, 2, 0]
    }

    let app = Router::new().route("/tts", post(tts));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), "Bearer tts-key".to_string());
    let synth = HttpSynthesizer::new(
        reqwest::Client::new(),
        format!("http://{}/tts", addr),
        "en-US-1",
        headers,
    );

    let audio = synth.synthesize("Welcome").await.unwrap();
    assert_eq!(audio, vec![1, 0, 2, 0]);
}

#[tokio::test]
async fn test_http_synthesizer_surfaces_error_status() {
    let app = Router::new().route(
        "/tts",
        post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let synth = HttpSynthesizer::new(
        reqwest::Client::new(),
        format!("http://{}/tts", addr),
        "v",
        HashMap::new(),
    );
    match synth.synthesize("Hi").await {
        Err(VoiceError::Tts(msg)) => assert!(msg.contains("502")),
        other => panic!("Expected Tts error, got {:?}", other),
    }
}
