//! Provider HTTP clients against a mock server

use praxis::error::ApiError;
use praxis::provider::{
    AnthropicClient, ChatMessage, GenerateOptions, GenerationProvider, GenerationService,
    OllamaClient, OpenAIClient, ProviderConfig, ProviderFactory, ProviderType,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn plan_messages() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("Reply with JSON"),
        ChatMessage::user("Learn Python"),
    ]
}

#[tokio::test]
async fn test_ollama_chat_returns_raw_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "mistral",
            "stream": false,
            "options": { "temperature": 0.7 },
            "messages": [{ "role": "system" }, { "role": "user", "content": "Learn Python" }],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "mistral",
            "message": { "role": "assistant", "content": "not json at all" },
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new("mistral".to_string(), Some(server.uri()), TIMEOUT).unwrap();
    let response = client
        .chat(plan_messages(), GenerateOptions::default().with_temperature(0.7))
        .await
        .unwrap();

    assert_eq!(response.content, "not json at all");
    assert_eq!(response.model, "mistral");
    assert!(response.done);
}

#[tokio::test]
async fn test_ollama_generate_and_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "prompt": "hello", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "mistral",
            "response": "hi there",
            "done": true,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "mistral:latest" }, { "name": "llama3:8b" }],
        })))
        .mount(&server)
        .await;

    let client = Arc::new(
        OllamaClient::new("mistral".to_string(), Some(server.uri()), TIMEOUT).unwrap(),
    );
    let response = client
        .generate("hello", GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "hi there");

    let check = GenerationService::new(client, TIMEOUT).check().await;
    assert!(check.connectivity_ok);
    assert!(check.model_available);
    assert_eq!(check.available_models.len(), 2);
}

#[tokio::test]
async fn test_incomplete_ollama_response_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "mistral",
            "message": { "role": "assistant", "content": "{\"title\":" },
            "done": false,
        })))
        .mount(&server)
        .await;

    let client = Arc::new(
        OllamaClient::new("mistral".to_string(), Some(server.uri()), TIMEOUT).unwrap(),
    );
    let err = GenerationService::new(client, TIMEOUT)
        .chat(plan_messages(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ProviderError(_)));
}

#[tokio::test]
async fn test_openai_chat_sends_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{ "message": { "role": "assistant", "content": "{}" } }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::hosted(
        "gpt-4o-mini".to_string(),
        "sk-test".to_string(),
        Some(server.uri()),
        TIMEOUT,
    )
    .unwrap();
    let response = client
        .chat(plan_messages(), GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "{}");
    assert_eq!(client.provider_name(), "openai");
}

#[tokio::test]
async fn test_local_custom_uses_configured_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2",
            "choices": [{ "message": { "role": "assistant", "content": "ok" } }],
        })))
        .mount(&server)
        .await;

    let config = ProviderConfig {
        provider_type: ProviderType::LocalCustom,
        model: "qwen2".to_string(),
        endpoint: Some(format!("{}/v1/", server.uri())),
        ..ProviderConfig::default()
    };
    let client = ProviderFactory::from_config(&config).unwrap();
    assert_eq!(client.provider_name(), "local");
    let response = client
        .generate("ping", GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "ok");
}

#[tokio::test]
async fn test_anthropic_lifts_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "Reply with JSON",
            "messages": [{ "role": "user", "content": "Learn Python" }],
            "max_tokens": 4096,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-3-5-haiku",
            "content": [{ "type": "text", "text": "{\"title\":\"t\"}" }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AnthropicClient::new(
        "claude-3-5-haiku".to_string(),
        "ak-test".to_string(),
        Some(format!("{}/v1", server.uri())),
        TIMEOUT,
    )
    .unwrap();
    let response = client
        .chat(plan_messages(), GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.content, "{\"title\":\"t\"}");
}

#[tokio::test]
async fn test_error_statuses_map_to_distinct_provider_errors() {
    let cases = [
        (401, "auth"),
        (429, "rate"),
        (404, "model"),
        (500, "failed"),
    ];
    for (status, label) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let client =
            OllamaClient::new("mistral".to_string(), Some(server.uri()), TIMEOUT).unwrap();
        let err = client
            .chat(plan_messages(), GenerateOptions::default())
            .await
            .unwrap_err();
        let matched = match label {
            "auth" => matches!(err, ApiError::ProviderAuthFailed(_)),
            "rate" => matches!(err, ApiError::ProviderRateLimit(_)),
            "model" => matches!(err, ApiError::ProviderModelNotFound(_)),
            _ => matches!(err, ApiError::ProviderRequestFailed(_)),
        };
        assert!(matched, "status {} mapped to {:?}", status, err);
        assert_eq!(err.status_code(), 502);
    }
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({
                    "model": "mistral",
                    "message": { "role": "assistant", "content": "late" },
                    "done": true,
                })),
        )
        .mount(&server)
        .await;

    let client = Arc::new(
        OllamaClient::new("mistral".to_string(), Some(server.uri()), TIMEOUT).unwrap(),
    );
    let err = GenerationService::new(client, Duration::from_millis(200))
        .chat(plan_messages(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ProviderTimeout(_)));
    assert_eq!(err.status_code(), 504);
}
