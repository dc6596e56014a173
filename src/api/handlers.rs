//! HTTP request handlers for the gateway API.
//!
//! This module contains the OpenAI-compatible chat endpoint, model listing,
//! the caller's usage and pricing views, health checks and metrics.

use crate::api::auth::resolve_user;
use crate::api::models::*;
use crate::api::streaming::{RelayContext, StreamRelay};
use crate::core::concurrency::{ConcurrencyGate, GatePermit};
use crate::core::logging::generate_request_id;
use crate::core::middleware::{ModelName, RequestId};
use crate::core::rate_limiter::RateLimiter;
use crate::core::store::{AdminStore, Store, UserEntity};
use crate::core::usage::{prompt_preview, CompletedExchange, UsageRecorder};
use crate::core::{AppError, Result};
use crate::services::Backend;
use crate::transformer::{ImageResolver, OllamaChatRequest, RequestTranslator};
use crate::with_request_context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub admin_store: Arc<dyn AdminStore>,
    pub backend: Arc<dyn Backend>,
    pub translator: RequestTranslator,
    pub rate_limiter: Arc<RateLimiter>,
    pub gate: ConcurrencyGate,
    pub recorder: UsageRecorder,
    pub ollama_url: String,
}

impl AppState {
    /// Wire the gateway components around one store.
    pub fn new<S>(
        store: Arc<S>,
        backend: Arc<dyn Backend>,
        images: Arc<dyn ImageResolver>,
        max_concurrent: usize,
        ollama_url: impl Into<String>,
    ) -> Self
    where
        S: AdminStore + 'static,
    {
        let request_store: Arc<dyn Store> = store.clone();
        let admin_store: Arc<dyn AdminStore> = store;

        Self {
            rate_limiter: Arc::new(RateLimiter::new(request_store.clone())),
            recorder: UsageRecorder::new(request_store.clone()),
            store: request_store,
            admin_store,
            backend,
            translator: RequestTranslator::new(images),
            gate: ConcurrencyGate::new(max_concurrent),
            ollama_url: ollama_url.into(),
        }
    }
}

/// Handle chat completion requests.
///
/// Supports both streaming and non-streaming responses. Streaming failures are
/// reported in-band as an error chunk followed by `data: [DONE]`.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "completions",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Chat completion, or an SSE stream of chunks when `stream` is true", body = ChatCompletionResponse),
        (status = 400, description = "Invalid request", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse),
        (status = 404, description = "Model not found", body = ApiErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ApiErrorResponse),
        (status = 502, description = "Backend error", body = ApiErrorResponse),
        (status = 503, description = "Backend unavailable", body = ApiErrorResponse)
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response> {
    let request_id = request_id
        .map(|Extension(RequestId(id))| id)
        .unwrap_or_else(generate_request_id);
    let user = resolve_user(state.store.as_ref(), &headers).await?;

    with_request_context!(request_id.clone(), user.id.clone(), async move {
        let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

        state.rate_limiter.check(&user.id).await?;
        let permit = state.gate.acquire().await?;
        let (backend_payload, warnings) = state.translator.to_backend(&payload).await?;

        let mut response = if payload.stream {
            if !warnings.is_empty() {
                tracing::debug!(warnings = ?warnings, "Dropping warnings for streaming request");
            }
            stream_chat(&state, &user, &payload, backend_payload, permit, request_id).await
        } else {
            complete_chat(&state, &user, &payload, backend_payload, permit, warnings, request_id)
                .await?
        };

        response
            .extensions_mut()
            .insert(ModelName(payload.model.clone()));
        Ok::<_, AppError>(response)
    })
}

#[tracing::instrument(
    skip_all,
    fields(user_id = %user.id, model = %payload.model, stream = true)
)]
async fn stream_chat(
    state: &AppState,
    user: &UserEntity,
    payload: &ChatCompletionRequest,
    backend_payload: OllamaChatRequest,
    permit: GatePermit,
    request_id: String,
) -> Response {
    let ctx = RelayContext {
        user_id: user.id.clone(),
        model: payload.model.clone(),
        include_usage: payload.include_usage(),
        request_id: Some(request_id),
        prompt_preview: payload.last_user_text().map(|t| prompt_preview(&t)),
    };

    let relay = match state.backend.chat_stream(&backend_payload).await {
        Ok(lines) => StreamRelay::new(
            ctx,
            lines,
            permit,
            state.recorder.clone(),
            state.rate_limiter.clone(),
        ),
        Err(e) => {
            permit.release();
            StreamRelay::rejected(ctx, e, state.recorder.clone(), state.rate_limiter.clone())
        }
    };

    relay.into_response()
}

#[tracing::instrument(
    skip_all,
    fields(user_id = %user.id, model = %payload.model, stream = false)
)]
async fn complete_chat(
    state: &AppState,
    user: &UserEntity,
    payload: &ChatCompletionRequest,
    backend_payload: OllamaChatRequest,
    permit: GatePermit,
    warnings: Vec<String>,
    request_id: String,
) -> Result<Response> {
    let reply = state.backend.chat(&backend_payload).await;
    permit.release();
    let reply = reply.inspect_err(|e| {
        tracing::warn!(category = %e.category(), error = %e, "Ollama chat failed");
    })?;

    let response = RequestTranslator::from_backend(&reply, &payload.model, warnings);

    let exchange = CompletedExchange {
        user_id: user.id.clone(),
        model: payload.model.clone(),
        prompt_tokens: response.usage.prompt_tokens,
        completion_tokens: response.usage.completion_tokens,
        request_id: Some(request_id),
        prompt_preview: payload.last_user_text().map(|t| prompt_preview(&t)),
    };
    if let Err(e) = state.recorder.settle(&state.rate_limiter, exchange).await {
        tracing::error!(error = %e, "Failed to record usage");
    }

    Ok(Json(response).into_response())
}

/// List models available on the backend.
#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses(
        (status = 200, description = "Available models", body = ModelList),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse),
        (status = 503, description = "Backend unavailable", body = ApiErrorResponse)
    )
)]
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ModelList>> {
    let user = resolve_user(state.store.as_ref(), &headers).await?;
    let names = state.backend.list_models().await.map_err(|e| {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to list backend models");
        e
    })?;
    Ok(Json(ModelList::from_names(names)))
}

/// Usage totals and per-model breakdown for the caller.
#[utoipa::path(
    get,
    path = "/v1/usage",
    tag = "usage",
    responses(
        (status = 200, description = "Usage statistics", body = UsageResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse)
    )
)]
pub async fn usage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>> {
    let user = resolve_user(state.store.as_ref(), &headers).await?;
    let stats = state.admin_store.usage_stats(&user.id).await?;

    Ok(Json(UsageResponse {
        user_id: user.id,
        total_tokens: stats.total_tokens,
        prompt_tokens: stats.prompt_tokens,
        completion_tokens: stats.completion_tokens,
        total_cost: stats.total_cost,
        request_count: stats.request_count,
        by_model: stats.by_model,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/usage/summary",
    tag = "usage",
    responses(
        (status = 200, description = "Usage summary", body = UsageSummaryResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse)
    )
)]
pub async fn usage_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsageSummaryResponse>> {
    let user = resolve_user(state.store.as_ref(), &headers).await?;
    let stats = state.admin_store.usage_stats(&user.id).await?;

    Ok(Json(UsageSummaryResponse {
        user_id: user.id,
        total_tokens: stats.total_tokens,
        total_cost: stats.total_cost,
        by_model: stats.by_model,
    }))
}

/// Current pricing table.
#[utoipa::path(
    get,
    path = "/v1/pricing",
    tag = "usage",
    responses(
        (status = 200, description = "Model pricing", body = PricingListResponse),
        (status = 401, description = "Missing or invalid API key", body = ApiErrorResponse)
    )
)]
pub async fn pricing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PricingListResponse>> {
    resolve_user(state.store.as_ref(), &headers).await?;
    let pricing = state.admin_store.list_pricing().await?;
    Ok(Json(PricingListResponse { pricing }))
}

pub async fn root(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        status: "ok".to_string(),
        service: "Ollama Gateway".to_string(),
        ollama_url: state.ollama_url.clone(),
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response())
}
