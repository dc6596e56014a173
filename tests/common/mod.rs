//! Shared helpers for gateway integration tests.
//!
//! Every test app runs against an in-memory store and a wiremock server
//! standing in for Ollama.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use ollama_gateway::{
    api::auth::{create_key_preview, generate_api_key, hash_key},
    build_router,
    core::{init_metrics, store::AdminStore, OllamaConfig, RateLimitPolicy, UploadConfig},
    services::{create_http_client, OllamaClient},
    transformer::HttpImageResolver,
    AdminState, AppState, MemoryStore,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
}

impl TestApp {
    /// Gateway pointed at `ollama` with room for `max_concurrent` backend calls.
    pub fn new(ollama: &MockServer, max_concurrent: usize) -> Self {
        Self::with_timeout(ollama, max_concurrent, 30)
    }

    pub fn with_timeout(ollama: &MockServer, max_concurrent: usize, timeout_secs: u64) -> Self {
        Self::build(ollama.uri(), max_concurrent, timeout_secs)
    }

    /// Gateway whose backend URL accepts no connections.
    pub fn unreachable() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Self::build(format!("http://{}", addr), 2, 5)
    }

    fn build(base_url: String, max_concurrent: usize, timeout_secs: u64) -> Self {
        init_metrics();

        let config = OllamaConfig {
            base_url: base_url.clone(),
            max_concurrent,
            connect_timeout_secs: 2,
            request_timeout_secs: timeout_secs,
            image_fetch_timeout_secs: 2,
            verify_ssl: true,
        };

        let client = create_http_client(&config).expect("http client");
        let backend = Arc::new(OllamaClient::new(client.clone(), &config));
        let images = Arc::new(HttpImageResolver::new(
            client,
            Duration::from_secs(config.image_fetch_timeout_secs),
            UploadConfig::default(),
        ));

        let store = Arc::new(MemoryStore::new());
        let admin_store: Arc<dyn AdminStore> = store.clone();
        let state = Arc::new(AppState::new(
            store.clone(),
            backend,
            images,
            max_concurrent,
            base_url,
        ));
        let admin_state = Arc::new(AdminState {
            store: admin_store,
            admin_key: ADMIN_KEY.to_string(),
            default_limits: RateLimitPolicy::default(),
        });

        Self {
            router: build_router(state.clone(), admin_state),
            store,
            state,
        }
    }

    /// Register `user_id` directly in the store and return its API key.
    pub async fn create_user(&self, user_id: &str, limits: RateLimitPolicy) -> String {
        let key = generate_api_key(user_id);
        self.store
            .create_user(user_id, &hash_key(&key), &create_key_preview(&key), &limits)
            .await
            .expect("create user");
        key
    }

    pub async fn set_pricing(&self, model: &str, input: f64, output: f64) {
        self.store
            .set_pricing(model, input, output, Some("test"))
            .await
            .expect("set pricing");
    }
}

pub fn chat_request(key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", key))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {}", key));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", ADMIN_KEY));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Parse the `data:` payloads of an SSE body, stopping before `[DONE]`.
///
/// The second value is true when the terminal `[DONE]` marker was present.
pub fn sse_events(body: &str) -> (Vec<Value>, bool) {
    let mut events = Vec::new();
    let mut done = false;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            done = true;
            break;
        }
        events.push(serde_json::from_str(data).expect("chunk is JSON"));
    }
    (events, done)
}

/// Ollama NDJSON body for a streamed reply made of `pieces`.
pub fn ndjson_reply(model: &str, pieces: &[&str], prompt_tokens: i64, eval_tokens: i64) -> String {
    let mut body = String::new();
    for piece in pieces {
        body.push_str(
            &serde_json::json!({
                "model": model,
                "created_at": "2024-01-01T00:00:00Z",
                "message": {"role": "assistant", "content": piece},
                "done": false
            })
            .to_string(),
        );
        body.push('\n');
    }
    body.push_str(
        &serde_json::json!({
            "model": model,
            "created_at": "2024-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": ""},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": prompt_tokens,
            "eval_count": eval_tokens
        })
        .to_string(),
    );
    body.push('\n');
    body
}

/// Ollama body for a non-streaming reply.
pub fn chat_reply(model: &str, content: &str, prompt_tokens: i64, eval_tokens: i64) -> Value {
    serde_json::json!({
        "model": model,
        "created_at": "2024-01-01T00:00:00Z",
        "message": {"role": "assistant", "content": content},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": prompt_tokens,
        "eval_count": eval_tokens
    })
}

/// Wait until `n` usage rows exist; usage writes may finish after the response.
pub async fn wait_for_usage(store: &MemoryStore, n: usize) {
    for _ in 0..100 {
        if store.usage_records().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
