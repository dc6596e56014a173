//! Streaming relay between the Ollama line stream and the client SSE stream.
//!
//! Each backend line is translated into an OpenAI-compatible chunk and framed as
//! a server-sent event. The relay moves through these states:
//!
//! ```text
//! Streaming ──done──▶ Completing ──▶ Terminated
//!     │
//!     └──fault──▶ ErrorBeforeStart | ErrorMidStream ──▶ Terminated
//! ```
//!
//! Every path into `Terminated` releases the backend stream and the
//! concurrency slot. Usage is written at most once, on the final event only.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use crate::api::disconnect::{DisconnectStream, StreamCompletion};
use crate::core::concurrency::GatePermit;
use crate::core::error::AppError;
use crate::core::error_types::ErrorCategoryCode;
use crate::core::metrics::get_metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::core::usage::{CompletedExchange, UsageRecorder};
use crate::services::BackendStream;
use crate::transformer::{completion_id, OllamaChatResponse, RequestTranslator};

/// Terminal SSE frame.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const CHAT_ENDPOINT: &str = "/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Streaming,
    Completing,
    ErrorBeforeStart,
    ErrorMidStream,
    Terminated,
}

impl RelayState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Completing => "completed",
            Self::ErrorBeforeStart => "error_before_start",
            Self::ErrorMidStream => "error_mid_stream",
            Self::Terminated => "terminated",
        }
    }
}

/// Per-request data the relay needs to label chunks and settle usage.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub user_id: String,
    pub model: String,
    pub include_usage: bool,
    pub request_id: Option<String>,
    pub prompt_preview: Option<String>,
}

pub struct StreamRelay {
    ctx: RelayContext,
    completion_id: String,
    backend: Option<BackendStream>,
    permit: Option<GatePermit>,
    recorder: UsageRecorder,
    limiter: Arc<RateLimiter>,
    state: RelayState,
    /// State the relay left `Streaming` through
    exit: Option<RelayState>,
    pending: VecDeque<Bytes>,
    usage_captured: bool,
    forwarded: usize,
    started: Instant,
    completion: StreamCompletion,
}

impl StreamRelay {
    pub fn new(
        ctx: RelayContext,
        backend: BackendStream,
        permit: GatePermit,
        recorder: UsageRecorder,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            ctx,
            completion_id: completion_id(),
            backend: Some(backend),
            permit: Some(permit),
            recorder,
            limiter,
            state: RelayState::Streaming,
            exit: None,
            pending: VecDeque::new(),
            usage_captured: false,
            forwarded: 0,
            started: Instant::now(),
            completion: StreamCompletion::new(),
        }
    }

    /// Relay for a backend call that failed before producing data.
    ///
    /// Emits one error chunk and the terminal sentinel; no usage is recorded.
    pub fn rejected(
        ctx: RelayContext,
        error: AppError,
        recorder: UsageRecorder,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let mut relay = Self {
            ctx,
            completion_id: completion_id(),
            backend: None,
            permit: None,
            recorder,
            limiter,
            state: RelayState::Streaming,
            exit: None,
            pending: VecDeque::new(),
            usage_captured: false,
            forwarded: 0,
            started: Instant::now(),
            completion: StreamCompletion::new(),
        };
        relay.fail(error);
        relay
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// How the relay left the streaming state, once it has.
    pub fn exit(&self) -> Option<RelayState> {
        self.exit
    }

    /// Chunk id shared by every frame of this stream.
    pub fn completion_id(&self) -> &str {
        &self.completion_id
    }

    pub fn completion(&self) -> StreamCompletion {
        self.completion.clone()
    }

    /// Next SSE frame for the client, or `None` once the stream is over.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.state == RelayState::Terminated {
                self.completion.mark_completed();
                return None;
            }
            self.pull().await;
        }
    }

    async fn pull(&mut self) {
        let next = match self.backend.as_mut() {
            Some(backend) => backend.next().await,
            None => None,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                self.fail(e);
                return;
            }
            None => {
                tracing::warn!(model = %self.ctx.model, "Ollama stream ended before the final event");
                self.fail(AppError::BackendServerError("Stream interrupted".to_string()));
                return;
            }
        };

        let event: OllamaChatResponse = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "Skipping undecodable stream line");
                return;
            }
        };

        if let Some(message) = &event.error {
            tracing::warn!(model = %self.ctx.model, error = %message, "Ollama reported an error mid-stream");
            self.fail(AppError::BackendServerError(message.clone()));
            return;
        }

        if event.done {
            self.complete(&event).await;
            return;
        }

        if self.forwarded == 0 {
            get_metrics()
                .ttft
                .with_label_values(&[&self.ctx.model])
                .observe(self.started.elapsed().as_secs_f64());
        }
        let chunk = RequestTranslator::from_backend_chunk(
            &event,
            &self.ctx.model,
            self.ctx.include_usage,
            &self.completion_id,
        );
        self.pending.push_back(data_frame(&chunk));
        self.forwarded += 1;
    }

    async fn complete(&mut self, event: &OllamaChatResponse) {
        self.state = RelayState::Completing;
        self.exit = Some(RelayState::Completing);

        // The backend slot is no longer needed while usage is written.
        self.release();

        if !self.usage_captured {
            self.usage_captured = true;
            let exchange = CompletedExchange {
                user_id: self.ctx.user_id.clone(),
                model: self.ctx.model.clone(),
                prompt_tokens: event.prompt_tokens(),
                completion_tokens: event.completion_tokens(),
                request_id: self.ctx.request_id.clone(),
                prompt_preview: self.ctx.prompt_preview.clone(),
            };
            if let Err(e) = self.recorder.settle(&self.limiter, exchange).await {
                tracing::error!(
                    user_id = %self.ctx.user_id,
                    model = %self.ctx.model,
                    error = %e,
                    "Failed to record streaming usage"
                );
            }
        }

        let chunk = RequestTranslator::from_backend_chunk(
            event,
            &self.ctx.model,
            self.ctx.include_usage,
            &self.completion_id,
        );
        self.pending.push_back(data_frame(&chunk));
        self.pending.push_back(Bytes::from_static(DONE_FRAME.as_bytes()));
        self.terminate();
    }

    fn fail(&mut self, error: AppError) {
        let state = if self.forwarded == 0 {
            RelayState::ErrorBeforeStart
        } else {
            RelayState::ErrorMidStream
        };
        self.state = state;
        self.exit = Some(state);

        let category = match state {
            RelayState::ErrorMidStream => ErrorCategoryCode::StreamError,
            _ => error.category(),
        };
        tracing::warn!(
            model = %self.ctx.model,
            state = state.as_str(),
            category = %category,
            chunks_forwarded = self.forwarded,
            error = %error,
            "Streaming exchange failed"
        );

        self.pending.push_back(data_frame(&error.to_error_body()));
        self.pending.push_back(Bytes::from_static(DONE_FRAME.as_bytes()));
        self.terminate();
    }

    fn release(&mut self) {
        self.backend = None;
        if let Some(permit) = self.permit.take() {
            permit.release();
        }
    }

    fn terminate(&mut self) {
        self.release();
        if let Some(exit) = self.exit {
            get_metrics()
                .stream_outcomes
                .with_label_values(&[exit.as_str()])
                .inc();
        }
        self.state = RelayState::Terminated;
    }

    /// Drive the relay as a body stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::unfold(self, |mut relay| async move {
            relay
                .next_frame()
                .await
                .map(|frame| (Ok::<_, Infallible>(frame), relay))
        })
    }

    /// Build the SSE response carrying this relay.
    pub fn into_response(self) -> Response {
        let completion = self.completion();
        let body = Body::from_stream(DisconnectStream {
            stream: Box::pin(self.into_stream()),
            completion,
            endpoint: CHAT_ENDPOINT,
        });

        let mut response = (StatusCode::OK, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

fn data_frame<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_string(value) {
        Ok(json) => Bytes::from(format!("data: {}\n\n", json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream chunk");
            Bytes::from_static(b"data: {}\n\n")
        }
    }
}
