//! Admin API handlers for users, rate limits and pricing.
//!
//! Provides RESTful endpoints for managing API users, their usage ceilings and
//! the model pricing table. All endpoints require ADMIN_KEY authentication.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::api::auth::{
    check_admin_key, create_key_preview, generate_api_key, hash_key, AdminAuthFailure,
};
use crate::api::models::{PricingListResponse, RateLimitResponse};
use crate::core::store::{
    AdminStore, PricingEntry, PricingHistoryEntry, RateLimitPolicy, RateLimitUpdate, UsageStats,
    UserEntity,
};
use crate::core::AppError;

const MAX_USER_ID_LEN: usize = 100;

/// OpenAPI documentation for Admin API (admin endpoints only)
#[derive(OpenApi)]
#[openapi(
    paths(
        create_user,
        list_users,
        delete_all_users,
        get_user,
        delete_user,
        get_user_usage,
        get_user_limits,
        update_user_limits,
        create_pricing,
        list_pricing,
        get_pricing,
        update_pricing,
        delete_pricing,
        get_all_pricing_history,
        get_model_pricing_history,
    ),
    components(
        schemas(
            CreateUserRequest,
            CreateUserResponse,
            UserResponse,
            UserListResponse,
            UserUsageResponse,
            MessageResponse,
            PricingRequest,
            PricingUpdateRequest,
            PricingHistoryResponse,
            AdminErrorResponse,
            AdminErrorDetail,
            PricingListResponse,
            RateLimitResponse,
            RateLimitPolicy,
            RateLimitUpdate,
            UsageStats,
            PricingEntry,
            PricingHistoryEntry,
        )
    ),
    tags(
        (name = "users", description = "User management endpoints"),
        (name = "limits", description = "Rate limit management endpoints"),
        (name = "pricing", description = "Model pricing management endpoints")
    ),
    info(
        title = "Ollama Gateway Admin API",
        version = "1.0.0",
        description = "Admin API for managing gateway users, rate limits and model pricing.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://127.0.0.1:8000", description = "Local development server"),
        (url = "http://localhost:8000", description = "Local development server (localhost)")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct AdminApiDoc;

/// OpenAPI documentation for V1 API (OpenAI-compatible and usage endpoints)
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::chat_completions,
        crate::api::handlers::list_models,
        crate::api::handlers::usage,
        crate::api::handlers::usage_summary,
        crate::api::handlers::pricing,
    ),
    components(
        schemas(
            crate::api::models::ChatCompletionRequest,
            crate::api::models::ChatCompletionResponse,
            crate::api::models::ChatCompletionChunk,
            crate::api::models::ChatMessage,
            crate::api::models::Choice,
            crate::api::models::Usage,
            crate::api::models::ModelList,
            crate::api::models::ModelInfo,
            crate::api::models::UsageResponse,
            crate::api::models::UsageSummaryResponse,
            crate::api::models::PricingListResponse,
            crate::api::models::ApiErrorResponse,
            crate::api::models::ApiErrorDetail,
        )
    ),
    tags(
        (name = "completions", description = "OpenAI-compatible completion endpoints"),
        (name = "models", description = "OpenAI-compatible model listing endpoints"),
        (name = "usage", description = "Usage and pricing for the calling user")
    ),
    info(
        title = "Ollama Gateway V1 API",
        version = "1.0.0",
        description = "OpenAI-compatible chat completions backed by Ollama, with per-user usage tracking.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://127.0.0.1:8000", description = "Local development server"),
        (url = "http://localhost:8000", description = "Local development server (localhost)")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct V1ApiDoc;

/// Create combined OpenAPI documentation by merging Admin and V1 APIs at runtime.
pub fn combined_openapi() -> utoipa::openapi::OpenApi {
    let mut combined = AdminApiDoc::openapi();
    let v1_doc = V1ApiDoc::openapi();

    for (path, item) in v1_doc.paths.paths {
        combined.paths.paths.insert(path, item);
    }

    if let Some(v1_components) = v1_doc.components {
        if let Some(ref mut combined_components) = combined.components {
            for (name, schema) in v1_components.schemas {
                combined_components.schemas.insert(name, schema);
            }
        }
    }

    if let Some(v1_tags) = v1_doc.tags {
        if let Some(ref mut combined_tags) = combined.tags {
            combined_tags.extend(v1_tags);
        } else {
            combined.tags = Some(v1_tags);
        }
    }

    combined.info.title = "Ollama Gateway API".to_string();
    combined.info.description = Some(
        "OpenAI-compatible gateway for Ollama with usage tracking, rate limiting and an Admin API."
            .to_string(),
    );

    combined
}

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            );
        }
    }
}

/// Admin API state
pub struct AdminState {
    pub store: Arc<dyn AdminStore>,
    pub admin_key: String,
    /// Limits given to newly created users
    pub default_limits: RateLimitPolicy,
}

/// Verify admin authentication
pub fn verify_admin_auth(headers: &HeaderMap, admin_key: &str) -> Result<(), AdminError> {
    check_admin_key(headers, admin_key).map_err(|failure| match failure {
        AdminAuthFailure::Missing => AdminError::Unauthorized,
        AdminAuthFailure::Invalid => AdminError::Forbidden,
    })
}

/// Admin API error types
#[derive(Debug)]
pub enum AdminError {
    Unauthorized,
    Forbidden,
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing Authorization header".to_string(),
            ),
            AdminError::Forbidden => (StatusCode::FORBIDDEN, "Invalid admin API key".to_string()),
            AdminError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AdminError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AdminError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AdminError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
                "code": status.as_u16()
            }
        });

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<AppError> for AdminError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::NotFound(msg) => AdminError::NotFound(msg),
            AppError::BadRequest(msg) => AdminError::BadRequest(msg),
            AppError::Conflict(msg) => AdminError::Conflict(msg),
            other => {
                tracing::error!(error = %other, "Admin store operation failed");
                AdminError::Internal("Internal server error".to_string())
            }
        }
    }
}

// ============================================================================
// User API Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({"user_id": "alice"}))]
pub struct CreateUserRequest {
    /// Unique user identifier (1-100 characters)
    pub user_id: String,
}

/// Newly created user. The API key is only ever returned here.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "user_id": "alice",
    "api_key": "sk-alice-3f9c2b7e4d1a8f6c0b5e9d2a7c4f1e8b",
    "key_preview": "sk-***e8b",
    "created_at": "2024-01-01T00:00:00Z"
}))]
pub struct CreateUserResponse {
    pub user_id: String,
    pub api_key: String,
    pub key_preview: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user_id: String,
    /// Masked API key
    pub key_preview: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserEntity> for UserResponse {
    fn from(e: UserEntity) -> Self {
        Self {
            user_id: e.id,
            key_preview: e.key_preview,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
}

/// Usage statistics and current limits of one user.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserUsageResponse {
    pub user_id: String,
    pub usage: UsageStats,
    pub rate_limits: Option<RateLimitResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

// ============================================================================
// Pricing API Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "model": "llama3.2:1b",
    "input_cost_per_million": 0.5,
    "output_cost_per_million": 1.5
}))]
pub struct PricingRequest {
    pub model: String,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PricingUpdateRequest {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PricingHistoryResponse {
    pub history: Vec<PricingHistoryEntry>,
}

/// Error response
#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "error": {
        "message": "User not found",
        "code": 404
    }
}))]
pub struct AdminErrorResponse {
    pub error: AdminErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminErrorDetail {
    pub message: String,
    pub code: u16,
}

fn validate_costs(input: f64, output: f64) -> Result<(), AdminError> {
    if !input.is_finite() || !output.is_finite() || input < 0.0 || output < 0.0 {
        return Err(AdminError::BadRequest(
            "Costs must be non-negative numbers".to_string(),
        ));
    }
    Ok(())
}

async fn require_user(state: &AdminState, user_id: &str) -> Result<UserEntity, AdminError> {
    state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AdminError::NotFound("User not found".to_string()))
}

fn pricing_not_found(model: &str) -> AdminError {
    AdminError::NotFound(format!("Pricing not found for model: {}", model))
}

// ============================================================================
// User Handlers
// ============================================================================

/// Create a user
///
/// Creates a user with the default rate limits and returns its API key.
#[utoipa::path(
    post,
    path = "/admin/v1/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = CreateUserResponse),
        (status = 400, description = "Invalid user id", body = AdminErrorResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 403, description = "Invalid admin key", body = AdminErrorResponse),
        (status = 409, description = "User already exists", body = AdminErrorResponse)
    )
)]
pub async fn create_user(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let user_id = req.user_id.trim();
    if user_id.is_empty() || user_id.chars().count() > MAX_USER_ID_LEN {
        return Err(AdminError::BadRequest(format!(
            "user_id must be between 1 and {} characters",
            MAX_USER_ID_LEN
        )));
    }

    if state.store.get_user(user_id).await?.is_some() {
        return Err(AdminError::Conflict("User already exists".to_string()));
    }

    let api_key = generate_api_key(user_id);
    let key_preview = create_key_preview(&api_key);
    let user = state
        .store
        .create_user(user_id, &hash_key(&api_key), &key_preview, &state.default_limits)
        .await?;

    tracing::info!(user_id = %user.id, "User created");

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user_id: user.id,
            api_key,
            key_preview: user.key_preview,
            created_at: user.created_at,
        }),
    ))
}

/// List all users
#[utoipa::path(
    get,
    path = "/admin/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "List of users", body = UserListResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse)
    )
)]
pub async fn list_users(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
) -> Result<Json<UserListResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let users = state.store.list_users().await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}

/// Delete every user
///
/// Removes all users, their limits and all recorded usage.
#[utoipa::path(
    delete,
    path = "/admin/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "Users deleted", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse)
    )
)]
pub async fn delete_all_users(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let count = state.store.delete_all_users().await?;
    tracing::warn!(count = count, "All users deleted via Admin API");

    Ok(MessageResponse::new(format!(
        "Deleted {} users and all associated data",
        count
    )))
}

#[utoipa::path(
    get,
    path = "/admin/v1/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User details", body = UserResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "User not found", body = AdminErrorResponse)
    )
)]
pub async fn get_user(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let user = require_user(&state, &user_id).await?;
    Ok(Json(user.into()))
}

/// Delete a user
///
/// Removes the user and its limits. Recorded usage is kept.
#[utoipa::path(
    delete,
    path = "/admin/v1/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "User not found", body = AdminErrorResponse)
    )
)]
pub async fn delete_user(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<MessageResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    if !state.store.delete_user(&user_id).await? {
        return Err(AdminError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %user_id, "User deleted");
    Ok(MessageResponse::new(format!(
        "User {} deleted successfully",
        user_id
    )))
}

#[utoipa::path(
    get,
    path = "/admin/v1/users/{user_id}/usage",
    tag = "users",
    params(
        ("user_id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Usage statistics", body = UserUsageResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "User not found", body = AdminErrorResponse)
    )
)]
pub async fn get_user_usage(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<UserUsageResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;
    require_user(&state, &user_id).await?;

    let usage = state.store.usage_stats(&user_id).await?;
    let rate_limits = state
        .store
        .get_rate_limit_policy(&user_id)
        .await?
        .map(|limits| RateLimitResponse {
            user_id: user_id.clone(),
            limits,
        });

    Ok(Json(UserUsageResponse {
        user_id,
        usage,
        rate_limits,
    }))
}

// ============================================================================
// Rate Limit Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/admin/v1/users/{user_id}/limits",
    tag = "limits",
    params(
        ("user_id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Current limits", body = RateLimitResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "User or limits not found", body = AdminErrorResponse)
    )
)]
pub async fn get_user_limits(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<RateLimitResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;
    require_user(&state, &user_id).await?;

    let limits = state
        .store
        .get_rate_limit_policy(&user_id)
        .await?
        .ok_or_else(|| AdminError::NotFound("Rate limits not found".to_string()))?;

    Ok(Json(RateLimitResponse { user_id, limits }))
}

/// Update rate limits
///
/// Only provided fields are changed.
#[utoipa::path(
    put,
    path = "/admin/v1/users/{user_id}/limits",
    tag = "limits",
    params(
        ("user_id" = String, Path, description = "User ID")
    ),
    request_body = RateLimitUpdate,
    responses(
        (status = 200, description = "Limits updated", body = RateLimitResponse),
        (status = 400, description = "No fields to update", body = AdminErrorResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "User not found", body = AdminErrorResponse)
    )
)]
pub async fn update_user_limits(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(update): Json<RateLimitUpdate>,
) -> Result<Json<RateLimitResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;
    require_user(&state, &user_id).await?;

    if update.is_empty() {
        return Err(AdminError::BadRequest("No fields to update".to_string()));
    }

    let limits = state
        .store
        .update_rate_limits(&user_id, &update)
        .await?
        .ok_or_else(|| AdminError::Internal("Failed to update rate limits".to_string()))?;

    tracing::info!(user_id = %user_id, update = ?update, "Rate limits updated");
    Ok(Json(RateLimitResponse { user_id, limits }))
}

// ============================================================================
// Pricing Handlers
// ============================================================================

/// Set pricing for a model
///
/// Creates or replaces the pricing entry and appends a history record.
#[utoipa::path(
    post,
    path = "/admin/v1/pricing",
    tag = "pricing",
    request_body = PricingRequest,
    responses(
        (status = 201, description = "Pricing set", body = PricingEntry),
        (status = 400, description = "Bad request", body = AdminErrorResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse)
    )
)]
pub async fn create_pricing(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(req): Json<PricingRequest>,
) -> Result<(StatusCode, Json<PricingEntry>), AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    if req.model.trim().is_empty() {
        return Err(AdminError::BadRequest("Model is required".to_string()));
    }
    validate_costs(req.input_cost_per_million, req.output_cost_per_million)?;

    let entry = state
        .store
        .set_pricing(
            req.model.trim(),
            req.input_cost_per_million,
            req.output_cost_per_million,
            Some("admin"),
        )
        .await?;

    tracing::info!(model = %entry.model, "Pricing set");
    Ok((StatusCode::CREATED, Json(entry)))
}

#[utoipa::path(
    get,
    path = "/admin/v1/pricing",
    tag = "pricing",
    responses(
        (status = 200, description = "All model pricing", body = PricingListResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse)
    )
)]
pub async fn list_pricing(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
) -> Result<Json<PricingListResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let pricing = state.store.list_pricing().await?;
    Ok(Json(PricingListResponse { pricing }))
}

#[utoipa::path(
    get,
    path = "/admin/v1/pricing/{model}",
    tag = "pricing",
    params(
        ("model" = String, Path, description = "Model name")
    ),
    responses(
        (status = 200, description = "Model pricing", body = PricingEntry),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "Pricing not found", body = AdminErrorResponse)
    )
)]
pub async fn get_pricing(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(model): Path<String>,
) -> Result<Json<PricingEntry>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let entry = state
        .store
        .get_pricing(&model)
        .await?
        .ok_or_else(|| pricing_not_found(&model))?;
    Ok(Json(entry))
}

/// Update pricing for an existing model
#[utoipa::path(
    put,
    path = "/admin/v1/pricing/{model}",
    tag = "pricing",
    params(
        ("model" = String, Path, description = "Model name")
    ),
    request_body = PricingUpdateRequest,
    responses(
        (status = 200, description = "Pricing updated", body = PricingEntry),
        (status = 400, description = "Bad request", body = AdminErrorResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "Pricing not found", body = AdminErrorResponse)
    )
)]
pub async fn update_pricing(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(model): Path<String>,
    Json(req): Json<PricingUpdateRequest>,
) -> Result<Json<PricingEntry>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;
    validate_costs(req.input_cost_per_million, req.output_cost_per_million)?;

    if state.store.get_pricing(&model).await?.is_none() {
        return Err(pricing_not_found(&model));
    }

    let entry = state
        .store
        .set_pricing(
            &model,
            req.input_cost_per_million,
            req.output_cost_per_million,
            Some("admin"),
        )
        .await?;

    tracing::info!(model = %model, "Pricing updated");
    Ok(Json(entry))
}

#[utoipa::path(
    delete,
    path = "/admin/v1/pricing/{model}",
    tag = "pricing",
    params(
        ("model" = String, Path, description = "Model name")
    ),
    responses(
        (status = 200, description = "Pricing deleted", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse),
        (status = 404, description = "Pricing not found", body = AdminErrorResponse)
    )
)]
pub async fn delete_pricing(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(model): Path<String>,
) -> Result<Json<MessageResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    if !state.store.delete_pricing(&model).await? {
        return Err(pricing_not_found(&model));
    }

    tracing::info!(model = %model, "Pricing deleted");
    Ok(MessageResponse::new(format!(
        "Pricing for model {} deleted successfully",
        model
    )))
}

/// Pricing change history for every model, newest first
#[utoipa::path(
    get,
    path = "/admin/v1/pricing/history/all",
    tag = "pricing",
    responses(
        (status = 200, description = "Pricing history", body = PricingHistoryResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse)
    )
)]
pub async fn get_all_pricing_history(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
) -> Result<Json<PricingHistoryResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let history = state.store.pricing_history(None).await?;
    Ok(Json(PricingHistoryResponse { history }))
}

#[utoipa::path(
    get,
    path = "/admin/v1/pricing/history/{model}",
    tag = "pricing",
    params(
        ("model" = String, Path, description = "Model name")
    ),
    responses(
        (status = 200, description = "Pricing history for one model", body = PricingHistoryResponse),
        (status = 401, description = "Unauthorized", body = AdminErrorResponse)
    )
)]
pub async fn get_model_pricing_history(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(model): Path<String>,
) -> Result<Json<PricingHistoryResponse>, AdminError> {
    verify_admin_auth(&headers, &state.admin_key)?;

    let history = state.store.pricing_history(Some(&model)).await?;
    Ok(Json(PricingHistoryResponse { history }))
}

// ============================================================================
// Router
// ============================================================================

/// Create Admin API router
pub fn admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        // User routes
        .route(
            "/users",
            get(list_users).post(create_user).delete(delete_all_users),
        )
        .route("/users/:user_id", get(get_user).delete(delete_user))
        .route("/users/:user_id/usage", get(get_user_usage))
        .route(
            "/users/:user_id/limits",
            get(get_user_limits).put(update_user_limits),
        )
        // Pricing routes
        .route("/pricing", get(list_pricing).post(create_pricing))
        .route("/pricing/history/all", get(get_all_pricing_history))
        .route("/pricing/history/:model", get(get_model_pricing_history))
        .route(
            "/pricing/:model",
            get(get_pricing).put(update_pricing).delete(delete_pricing),
        )
        .with_state(state)
}
