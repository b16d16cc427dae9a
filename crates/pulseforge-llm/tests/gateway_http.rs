//! Mock HTTP server tests for [`OpenAiCompatClient::complete`].
//!
//! Stands up a local wiremock server emulating the model gateway and
//! exercises the full request/response path: success, entitlement
//! rejection, rate limiting with retry hints, missing models, 5xx
//! errors, malformed bodies, and the per-call timeout.

use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulseforge_llm::client::ModelClient;
use pulseforge_llm::error::ModelError;
use pulseforge_llm::openai_compat::{EndpointConfig, OpenAiCompatClient};
use pulseforge_llm::types::{ChatMessage, ChatRequest};

fn mock_client(server_url: &str) -> OpenAiCompatClient {
    let config = EndpointConfig::new("gateway", server_url, "UNUSED_KEY_ENV")
        .with_timeout(Duration::from_secs(5));
    OpenAiCompatClient::with_api_key(config, "sk-mock-key".into())
}

fn test_request() -> ChatRequest {
    ChatRequest::new("test-model", vec![ChatMessage::user("Hello")]).with_max_tokens(64)
}

fn completion_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "cmpl-001",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19 }
    })
}

#[tokio::test]
async fn complete_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-mock-key"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hi there")))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let response = client.complete(&test_request()).await.unwrap();

    assert_eq!(response.id, "cmpl-001");
    assert_eq!(response.first_text(), Some("Hi there"));
    let usage = response.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 12);
    assert_eq!(usage.completion_tokens, 7);
}

#[tokio::test]
async fn status_401_maps_to_not_entitled() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ModelError::NotEntitled(_)));
}

#[tokio::test]
async fn status_403_maps_to_not_entitled() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(403).set_body_string("model access denied"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    match err {
        ModelError::NotEntitled(body) => assert!(body.contains("denied")),
        other => panic!("expected NotEntitled, got {other}"),
    }
}

#[tokio::test]
async fn status_404_maps_to_model_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    match err {
        ModelError::ModelNotFound(msg) => assert!(msg.contains("test-model")),
        other => panic!("expected ModelNotFound, got {other}"),
    }
}

#[tokio::test]
async fn status_429_uses_retry_after_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    match err {
        ModelError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 3000),
        other => panic!("expected RateLimited, got {other}"),
    }
}

#[tokio::test]
async fn status_429_uses_body_hint_when_no_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(serde_json::json!({"error": {"retry_after_ms": 450}})),
        )
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    match err {
        ModelError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 450),
        other => panic!("expected RateLimited, got {other}"),
    }
}

#[tokio::test]
async fn status_500_is_transient_request_failed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    match &err {
        ModelError::RequestFailed(msg) => assert!(msg.starts_with("HTTP 500")),
        other => panic!("expected RequestFailed, got {other}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri());
    let err = client.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ModelError::InvalidResponse(_)));
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = EndpointConfig::new("gateway", server.uri(), "UNUSED_KEY_ENV")
        .with_timeout(Duration::from_millis(100));
    let client = OpenAiCompatClient::with_api_key(config, "sk-mock-key".into());

    let err = client.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ModelError::Timeout));
}
