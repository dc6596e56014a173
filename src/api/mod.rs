//! API layer for the gateway.
//!
//! This module contains all HTTP handlers, request/response models, the
//! streaming relay and the Admin API, plus [`build_router`] which assembles them.

pub mod admin;
pub mod auth;
pub mod disconnect;
pub mod handlers;
pub mod models;
pub mod streaming;

// Re-export commonly used types
pub use admin::{admin_router, combined_openapi, AdminApiDoc, AdminState, V1ApiDoc};
pub use handlers::{
    chat_completions, health, list_models, metrics_handler, pricing, root, usage, usage_summary,
    AppState,
};
pub use models::{ChatCompletionRequest, ChatCompletionResponse, ModelList};
pub use streaming::{RelayContext, RelayState, StreamRelay};

use crate::core::middleware::{admin_logging_middleware, request_id_middleware, MetricsMiddleware};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa_swagger_ui::SwaggerUi;

/// Build router with all endpoints
pub fn build_router(state: Arc<AppState>, admin_state: Arc<AdminState>) -> Router {
    // Admin routes with logging middleware
    let admin_routes =
        admin_router(admin_state).layer(axum::middleware::from_fn(admin_logging_middleware));

    // Swagger UI for API documentation (includes both V1 and Admin APIs)
    let swagger_ui =
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", combined_openapi());

    let api_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/usage", get(usage))
        .route("/v1/usage/summary", get(usage_summary))
        .route("/v1/pricing", get(pricing))
        .with_state(state);

    Router::new()
        .nest("/admin/v1", admin_routes)
        .merge(swagger_ui)
        .merge(api_routes)
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
