//! HTTP client for the Ollama backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use std::time::{Duration, Instant};

use crate::core::config::OllamaConfig;
use crate::core::error::{AppError, Result};
use crate::core::metrics::get_metrics;
use crate::services::backend::{Backend, BackendStream};
use crate::transformer::{OllamaChatRequest, OllamaChatResponse, OllamaTagsResponse};

const UNREACHABLE: &str = "Unable to connect to Ollama server";

/// Create the shared HTTP client.
///
/// The connect timeout applies to every call; the total timeout is applied
/// per request so a streaming call can carry its deadline into the body.
pub fn create_http_client(config: &OllamaConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .danger_accept_invalid_certs(!config.verify_ssl)
        .pool_max_idle_per_host(config.max_concurrent.max(1) * 2)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Map a non-success backend status to the gateway error for `model`.
pub fn map_status(status: StatusCode, model: &str) -> AppError {
    match status.as_u16() {
        404 => AppError::BackendModelNotFound(model.to_string()),
        400 => AppError::BackendBadRequest("Invalid request to Ollama".to_string()),
        s if s >= 500 => AppError::BackendServerError("Ollama server error".to_string()),
        s => AppError::BackendServerError(format!("Ollama request failed: {}", s)),
    }
}

fn map_transport(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        tracing::warn!(error = %err, "Ollama request timed out");
    } else {
        tracing::warn!(error = %err, "Ollama request failed");
    }
    AppError::BackendUnavailable(UNREACHABLE.to_string())
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, config: &OllamaConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a chat request, waiting for response headers until `deadline`.
    async fn post_chat(
        &self,
        payload: &OllamaChatRequest,
        deadline: tokio::time::Instant,
    ) -> Result<reqwest::Response> {
        let request = self.client.post(self.url("/api/chat")).json(payload);

        let response = tokio::time::timeout_at(deadline, request.send())
            .await
            .map_err(|_| {
                tracing::warn!(model = %payload.model, "Ollama request timed out waiting for response");
                AppError::BackendUnavailable(UNREACHABLE.to_string())
            })?
            .map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout_at(deadline, response.text())
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                model = %payload.model,
                body = %body,
                "Ollama rejected chat request"
            );
            return Err(map_status(status, &payload.model));
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for OllamaClient {
    async fn chat(&self, payload: &OllamaChatRequest) -> Result<OllamaChatResponse> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let response = self.post_chat(payload, deadline).await?;
        let reply = tokio::time::timeout_at(deadline, response.json::<OllamaChatResponse>())
            .await
            .map_err(|_| {
                tracing::warn!(model = %payload.model, "Ollama response body timed out");
                AppError::BackendUnavailable(UNREACHABLE.to_string())
            })?
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to decode Ollama response");
                AppError::BackendServerError("Invalid response from Ollama".to_string())
            })?;

        get_metrics()
            .backend_latency
            .with_label_values(&["chat"])
            .observe(start.elapsed().as_secs_f64());

        if let Some(error) = &reply.error {
            return Err(AppError::BackendServerError(error.clone()));
        }
        Ok(reply)
    }

    async fn chat_stream(&self, payload: &OllamaChatRequest) -> Result<BackendStream> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let response = self.post_chat(payload, deadline).await?;
        get_metrics()
            .backend_latency
            .with_label_values(&["chat_stream"])
            .observe(start.elapsed().as_secs_f64());

        Ok(ndjson_lines(response.bytes_stream(), deadline).boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            return Err(AppError::BackendServerError(format!(
                "Unable to fetch models: {}",
                response.status()
            )));
        }

        let tags = response.json::<OllamaTagsResponse>().await.map_err(|e| {
            AppError::BackendServerError(format!("Unable to fetch models: {}", e))
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Split a byte stream into trimmed, non-empty lines.
///
/// Reaching `deadline` before the body ends, or a transport error, yields one
/// `Err` and ends the stream.
pub fn ndjson_lines<S, E>(
    body: S,
    deadline: tokio::time::Instant,
) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = match tokio::time::timeout_at(deadline, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("Ollama stream exceeded its deadline");
                    yield Err(AppError::BackendServerError("Stream interrupted".to_string()));
                    return;
                }
            };

            match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line).trim().to_string();
                        if !line.is_empty() {
                            yield Ok(line);
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Ollama stream interrupted");
                    yield Err(AppError::BackendServerError("Stream interrupted".to_string()));
                    return;
                }
                None => break,
            }
        }

        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield Ok(rest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn later(secs: u64) -> tokio::time::Instant {
        tokio::time::Instant::now() + Duration::from_secs(secs)
    }

    fn chunks(parts: Vec<&'static str>) -> impl Stream<Item = std::result::Result<Bytes, String>> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let body = chunks(vec!["{\"a\":1}\n{\"b\"", ":2}\n\n", "{\"c\":3}"]);
        let lines: Vec<String> = ndjson_lines(body, later(5))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from("{\"a\":1}\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from("{\"never\":1}\n")),
        ]);
        let items: Vec<Result<String>> = ndjson_lines(body, later(5)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(AppError::BackendServerError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_stalled_stream() {
        let body = stream::pending::<std::result::Result<Bytes, String>>();
        let items: Vec<Result<String>> = ndjson_lines(body, later(30)).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_spans_whole_stream() {
        // A line every 10s never trips an idle gap but does pass the deadline
        let body = stream::unfold(0u32, |n| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Some((Ok::<_, String>(Bytes::from(format!("{{\"n\":{}}}\n", n))), n + 1))
        });
        let items: Vec<Result<String>> = ndjson_lines(body, later(35)).collect().await;
        assert_eq!(items.len(), 4);
        assert!(items[..3].iter().all(|i| i.is_ok()));
        assert!(matches!(
            &items[3],
            Err(AppError::BackendServerError(m)) if m == "Stream interrupted"
        ));
    }

    #[test]
    fn test_map_status() {
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "llama3"),
            AppError::BackendModelNotFound(m) if m == "llama3"
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "m"),
            AppError::BackendBadRequest(_)
        ));
        assert!(matches!(
            map_status(StatusCode::SERVICE_UNAVAILABLE, "m"),
            AppError::BackendServerError(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "m"),
            AppError::BackendServerError(msg) if msg.contains("401")
        ));
    }
}
