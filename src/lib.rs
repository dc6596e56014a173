//! Ollama Gateway - an OpenAI-compatible usage gateway in front of Ollama
//!
//! This library provides a production-ready gateway between clients speaking the
//! OpenAI chat completions protocol and a local Ollama server, with features
//! including:
//!
//! - **Protocol Translation**: OpenAI chat requests and responses to and from Ollama `/api/chat`
//! - **Streaming Support**: Server-Sent Events relay with in-band error reporting
//! - **Usage Tracking**: One usage record with cost per completed request
//! - **Rate Limiting**: Per-user minute, day and lifetime ceilings
//! - **Backend Protection**: A bounded number of concurrent Ollama calls
//! - **Metrics & Monitoring**: Prometheus metrics for observability
//! - **Admin API**: User, limit and pricing management
//!
//! # Architecture
//!
//! The codebase is organized into four main layers:
//!
//! - [`core`]: Core functionality (config, store, errors, limiter, metrics, middleware)
//! - [`api`]: HTTP handlers, streaming relay, Admin API, and request/response models
//! - [`transformer`]: Translation between the OpenAI and Ollama wire formats
//! - [`services`]: The Ollama backend client
//!
//! # Configuration
//!
//! The server requires the following environment variables:
//! - `DB_URL`: PostgreSQL database connection URL (`memory://` for an in-process store)
//! - `ADMIN_KEY`: Admin API authentication key
//!
//! Optional environment variables:
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 8000)
//! - `OLLAMA_BASE_URL`: Ollama server URL (default: http://localhost:11434)
//! - `OLLAMA_MAX_CONCURRENT`: Concurrent Ollama calls (default: 4)
//! - `OLLAMA_REQUEST_TIMEOUT_SECS`: Ollama request timeout in seconds (default: 120)

pub mod api;
pub mod core;
pub mod services;
pub mod transformer;

// Re-export commonly used types for convenience
pub use api::{
    admin_router, build_router, combined_openapi, AdminApiDoc, AdminState, AppState,
    ChatCompletionRequest, ChatCompletionResponse,
};
pub use core::{
    admin_logging_middleware, AppConfig, AppError, Database, DatabaseConfig, MemoryStore, Result,
};
pub use services::OllamaClient;
