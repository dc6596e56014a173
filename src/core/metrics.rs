//! Prometheus metrics for monitoring the gateway.
//!
//! This module provides a centralized metrics registry for tracking requests,
//! latency, token usage, rate limiting and backend load.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    GaugeVec, HistogramVec, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Total token usage by model and token type
    pub token_usage: IntCounterVec,

    /// Requests rejected by the rate limiter, by ceiling
    pub rate_limit_rejections: IntCounterVec,

    /// Backend calls currently holding a concurrency slot
    pub backend_in_flight: IntGauge,

    /// Backend response latency histogram in seconds
    pub backend_latency: HistogramVec,

    /// Time to first token (TTFT) histogram in seconds for streaming requests
    pub ttft: HistogramVec,

    /// Terminal state reached by each streaming exchange
    pub stream_outcomes: IntCounterVec,

    /// Responses dropped by the client before completion
    pub client_disconnects: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// This should be called once at application startup. Subsequent calls will
/// return the same instance.
///
/// # Examples
///
/// ```no_run
/// use ollama_gateway::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.request_count.with_label_values(&["GET", "/health", "200"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "ollama_gateway_requests_total",
            "Total number of requests",
            &["method", "endpoint", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "ollama_gateway_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "ollama_gateway_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let token_usage = register_int_counter_vec!(
            "ollama_gateway_tokens_total",
            "Total number of tokens used",
            &["model", "token_type"]
        )
        .expect("Failed to register token_usage metric");

        let rate_limit_rejections = register_int_counter_vec!(
            "ollama_gateway_rate_limit_rejections_total",
            "Requests rejected by a rate limit ceiling",
            &["ceiling"]
        )
        .expect("Failed to register rate_limit_rejections metric");

        let backend_in_flight = register_int_gauge!(
            "ollama_gateway_backend_in_flight",
            "Backend calls currently holding a concurrency slot"
        )
        .expect("Failed to register backend_in_flight metric");

        let backend_latency = register_histogram_vec!(
            "ollama_gateway_backend_latency_seconds",
            "Backend response latency in seconds",
            &["operation"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register backend_latency metric");

        let ttft = register_histogram_vec!(
            "ollama_gateway_ttft_seconds",
            "Time to first token (TTFT) in seconds for streaming requests",
            &["model"],
            vec![0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0]
        )
        .expect("Failed to register ttft metric");

        let stream_outcomes = register_int_counter_vec!(
            "ollama_gateway_stream_outcomes_total",
            "Streaming exchanges by terminal outcome",
            &["outcome"]
        )
        .expect("Failed to register stream_outcomes metric");

        let client_disconnects = register_int_counter_vec!(
            "ollama_gateway_client_disconnects_total",
            "Responses dropped by the client before completion",
            &["endpoint"]
        )
        .expect("Failed to register client_disconnects metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            token_usage,
            rate_limit_rejections,
            backend_in_flight,
            backend_latency,
            ttft,
            stream_outcomes,
            client_disconnects,
        }
    })
}

/// Get the global metrics instance, registering it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = init_metrics();
        metrics
            .request_count
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let metrics2 = get_metrics();
        assert!(std::ptr::eq(metrics, metrics2));
    }

    #[test]
    fn test_request_count_metric() {
        let metrics = init_metrics();
        let labels = ["POST", "/v1/chat/completions-unique", "201"];

        let initial = metrics.request_count.with_label_values(&labels).get();
        metrics.request_count.with_label_values(&labels).inc();
        let after = metrics.request_count.with_label_values(&labels).get();

        assert_eq!(after, initial + 1);
    }

    #[test]
    fn test_active_requests_metric() {
        let metrics = init_metrics();
        let gauge = metrics.active_requests.with_label_values(&["/metrics-test"]);

        let initial = gauge.get();
        gauge.inc();
        assert_eq!(gauge.get(), initial + 1.0);
        gauge.dec();
        assert_eq!(gauge.get(), initial);
    }

    #[test]
    fn test_token_usage_metric() {
        let metrics = init_metrics();
        let counter = metrics
            .token_usage
            .with_label_values(&["metrics-test-model", "prompt"]);

        let initial = counter.get();
        counter.inc_by(100);
        assert_eq!(counter.get(), initial + 100);
    }

    #[test]
    fn test_rate_limit_rejection_metric() {
        let metrics = init_metrics();
        let counter = metrics
            .rate_limit_rejections
            .with_label_values(&["metrics_test_ceiling"]);

        counter.inc();
        counter.inc();
        assert!(counter.get() >= 2);
    }

    #[test]
    fn test_backend_latency_metric() {
        let metrics = init_metrics();
        let histogram = metrics.backend_latency.with_label_values(&["metrics-test"]);
        histogram.observe(0.5);
        histogram.observe(1.2);
        assert!(histogram.get_sample_count() >= 2);
    }
}
