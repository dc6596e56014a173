//! Backend services for the gateway.
//!
//! [`Backend`] is the seam the handlers call through; [`OllamaClient`] is the
//! HTTP implementation talking to Ollama.

pub mod backend;
pub mod ollama_client;

// Re-export commonly used types
pub use backend::{Backend, BackendStream};
pub use ollama_client::{create_http_client, OllamaClient};
