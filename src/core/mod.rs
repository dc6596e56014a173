//! Core functionality for the gateway.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - The durable store and its PostgreSQL implementation
//! - Rate limiting, the backend concurrency gate and usage recording
//! - Metrics collection
//! - HTTP middleware

pub mod concurrency;
pub mod config;
pub mod database;
pub mod error;
pub mod error_types;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod store;
pub mod usage;

// Re-export commonly used types
pub use concurrency::{ConcurrencyGate, GatePermit};
pub use config::{AppConfig, OllamaConfig, ServerConfig, UploadConfig};
pub use database::{Database, DatabaseConfig};
pub use error::{AppError, Result};
pub use logging::{generate_request_id, get_request_id, get_user_id, REQUEST_ID, USER_ID};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::{admin_logging_middleware, request_id_middleware, MetricsMiddleware};
pub use rate_limiter::{Ceiling, RateLimiter};
pub use store::{AdminStore, MemoryStore, RateLimitPolicy, RateLimitUpdate, Store};
pub use usage::{CompletedExchange, UsageRecorder};
