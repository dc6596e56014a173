//! HTTP middleware for request ids, metrics and admin request logging.

use crate::core::logging::{generate_request_id, REQUEST_ID};
use crate::core::metrics::get_metrics;
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

/// Endpoints reported under their own metric label
const TRACKED_ENDPOINTS: &[&str] = &[
    "/",
    "/health",
    "/v1/chat/completions",
    "/v1/models",
    "/v1/usage",
    "/v1/usage/summary",
    "/v1/pricing",
];

/// Request ID attached to request extensions by [`request_id_middleware`]
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Extension type for storing model name in response
#[derive(Clone, Debug)]
pub struct ModelName(pub String);

fn is_valid_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Collapse dynamic paths so metric label cardinality stays bounded.
fn metrics_endpoint(path: &str) -> &str {
    if TRACKED_ENDPOINTS.contains(&path) {
        path
    } else if path.starts_with("/admin/") {
        "/admin"
    } else {
        "other"
    }
}

/// Reuse the client's `X-Request-Id` or generate one.
///
/// The id is stored in request extensions and in the [`REQUEST_ID`] task-local
/// for the rest of the request, and echoed on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| is_valid_request_id(v))
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = REQUEST_ID
        .scope(request_id.clone(), next.run(request))
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Middleware for logging admin API requests.
///
/// This middleware logs all requests to /admin/v1/* endpoints with:
/// - HTTP method
/// - Request path
/// - Response status code
/// - Request duration
pub async fn admin_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    tracing::info!(
        "[Admin API] {} {} - status={} duration={:.3}s",
        method,
        path,
        status,
        duration
    );

    response
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// This middleware:
    /// - Increments active request counter
    /// - Measures request duration
    /// - Records request count by status code
    /// - Logs gateway requests with their model
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let path = request.uri().path().to_string();
        let method = request.method().to_string();

        // Skip metrics endpoint itself to avoid recursion
        if path == "/metrics" {
            return next.run(request).await;
        }

        let endpoint = metrics_endpoint(&path).to_string();
        let metrics = get_metrics();
        let active = metrics.active_requests.with_label_values(&[&endpoint]);
        active.inc();

        let start = Instant::now();
        let response = next.run(request).await;

        // For streaming responses this is time to first byte, since the body
        // is still being produced when `next.run` returns.
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();
        active.dec();

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint])
            .observe(duration);

        if endpoint == "/v1/chat/completions" {
            let model = response
                .extensions()
                .get::<ModelName>()
                .map(|m| m.0.as_str())
                .unwrap_or("unknown");
            tracing::info!(
                model = %model,
                status = %status_code,
                duration_secs = duration,
                "{} {}",
                method,
                path
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|| async { crate::core::logging::get_request_id() }),
            )
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_request_id_generated_when_absent() {
        let response = app()
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let header = response.headers().get(&REQUEST_ID_HEADER).unwrap();
        assert!(uuid::Uuid::parse_str(header.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_reused_and_visible_in_handler() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header("x-request-id", "client-abc-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(&REQUEST_ID_HEADER).unwrap(), "client-abc-1");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"client-abc-1");
    }

    #[tokio::test]
    async fn test_invalid_request_id_replaced() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header("x-request-id", "has spaces in it")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response.headers().get(&REQUEST_ID_HEADER).unwrap();
        assert_ne!(header, "has spaces in it");
    }

    #[test]
    fn test_metrics_endpoint_collapses_dynamic_paths() {
        assert_eq!(metrics_endpoint("/v1/chat/completions"), "/v1/chat/completions");
        assert_eq!(metrics_endpoint("/admin/v1/users/alice"), "/admin");
        assert_eq!(metrics_endpoint("/random/path"), "other");
    }
}
