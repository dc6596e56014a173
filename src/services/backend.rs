//! Backend abstraction used by the chat handlers.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::error::Result;
use crate::transformer::{OllamaChatRequest, OllamaChatResponse};

/// Newline-delimited JSON lines of one streamed reply.
///
/// An `Err` item is a transport fault after the stream started.
pub type BackendStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Single-shot chat call.
    async fn chat(&self, payload: &OllamaChatRequest) -> Result<OllamaChatResponse>;

    /// Start a streamed chat call.
    ///
    /// Errors returned here happen before any data was produced.
    async fn chat_stream(&self, payload: &OllamaChatRequest) -> Result<BackendStream>;

    /// Names of the models the backend can serve.
    async fn list_models(&self) -> Result<Vec<String>>;
}
