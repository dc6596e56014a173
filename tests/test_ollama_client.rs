//! OllamaClient against a mocked Ollama server.

use assert_matches::assert_matches;
use futures::StreamExt;
use ollama_gateway::{
    core::{AppError, OllamaConfig},
    services::{create_http_client, Backend, OllamaClient},
    transformer::{OllamaChatRequest, OllamaMessage},
};
use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client_for(server: &MockServer, request_timeout_secs: u64) -> OllamaClient {
    let config = OllamaConfig {
        base_url: format!("{}/", server.uri()),
        request_timeout_secs,
        ..OllamaConfig::default()
    };
    let http = create_http_client(&config).unwrap();
    OllamaClient::new(http, &config)
}

fn payload(model: &str, stream: bool) -> OllamaChatRequest {
    OllamaChatRequest {
        model: model.to_string(),
        messages: vec![OllamaMessage {
            role: "user".to_string(),
            content: "hello".to_string(),
            images: Vec::new(),
        }],
        stream,
        options: None,
        format: None,
    }
}

#[tokio::test]
async fn test_chat_posts_payload_and_decodes_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.2:1b",
            "stream": false,
            "messages": [{"role": "user", "content": "hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2:1b",
            "message": {"role": "assistant", "content": "hi"},
            "done": true,
            "prompt_eval_count": 7,
            "eval_count": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server, 5)
        .chat(&payload("llama3.2:1b", false))
        .await
        .unwrap();
    assert!(reply.done);
    assert_eq!(reply.prompt_tokens(), 7);
    assert_eq!(reply.completion_tokens(), 2);
    assert_eq!(reply.message.unwrap().content, "hi");
}

#[tokio::test]
async fn test_chat_status_errors() {
    let server = MockServer::start().await;
    for (model, status) in [("missing", 404), ("bad", 400), ("boom", 503)] {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": model})))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    let client = client_for(&server, 5);

    assert_matches!(
        client.chat(&payload("missing", false)).await,
        Err(AppError::BackendModelNotFound(m)) if m == "missing"
    );
    assert_matches!(
        client.chat(&payload("bad", false)).await,
        Err(AppError::BackendBadRequest(_))
    );
    assert_matches!(
        client.chat(&payload("boom", false)).await,
        Err(AppError::BackendServerError(m)) if m == "Ollama server error"
    );
    assert_matches!(
        client.chat_stream(&payload("missing", true)).await.map(|_| ()),
        Err(AppError::BackendModelNotFound(_))
    );
}

#[tokio::test]
async fn test_chat_timeout_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"done": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let result = client_for(&server, 1).chat(&payload("slow", false)).await;
    assert_matches!(result, Err(AppError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_chat_stream_timeout_before_headers_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"done\":true}\n")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let result = client_for(&server, 1).chat_stream(&payload("slow", true)).await;
    assert_matches!(result.map(|_| ()), Err(AppError::BackendUnavailable(_)));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_in_band_error_on_single_shot_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "out of memory"})))
        .mount(&server)
        .await;

    let result = client_for(&server, 5).chat(&payload("m", false)).await;
    assert_matches!(result, Err(AppError::BackendServerError(m)) if m == "out of memory");
}

#[tokio::test]
async fn test_chat_stream_yields_lines() {
    let server = MockServer::start().await;
    let body = "{\"message\":{\"role\":\"assistant\",\"content\":\"a\"},\"done\":false}\n\n\
                {\"message\":{\"role\":\"assistant\",\"content\":\"b\"},\"done\":false}\n\
                {\"done\":true,\"prompt_eval_count\":3,\"eval_count\":2}";
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let lines: Vec<String> = client_for(&server, 5)
        .chat_stream(&payload("m", true))
        .await
        .unwrap()
        .map(|line| line.unwrap())
        .collect()
        .await;

    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("\"a\""));
    assert!(lines[2].contains("\"done\":true"));
}

#[tokio::test]
async fn test_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3.2:1b", "size": 1}, {"name": "moondream"}]
        })))
        .mount(&server)
        .await;

    let models = client_for(&server, 5).list_models().await.unwrap();
    assert_eq!(models, vec!["llama3.2:1b", "moondream"]);
}

#[tokio::test]
async fn test_list_models_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert_matches!(
        client_for(&server, 5).list_models().await,
        Err(AppError::BackendServerError(_))
    );
}
