//! Translation between the OpenAI chat completion wire format and Ollama.
//!
//! ```text
//! ChatCompletionRequest ──to_backend──▶ OllamaChatRequest (+ warnings)
//! OllamaChatResponse    ──from_backend──▶ ChatCompletionResponse
//! stream line           ──from_backend_chunk──▶ ChatCompletionChunk
//! ```

pub mod images;
pub mod ollama;

use std::sync::Arc;

pub use images::{HttpImageResolver, ImageResolver};
pub use ollama::{
    OllamaChatRequest, OllamaChatResponse, OllamaMessage, OllamaOptions, OllamaTagsResponse,
};

use crate::api::models::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    ChunkChoice, ContentPart, Delta, MessageContent, ResponseMessage, Usage,
};
use crate::core::error::{AppError, Result};

/// Wire fields accepted from clients but never sent to the backend.
const UNSUPPORTED_FIELDS: &[&str] = &["tools", "tool_choice", "logprobs", "logit_bias"];

/// Fresh completion id, shared by every chunk of one stream.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Clone)]
pub struct RequestTranslator {
    images: Arc<dyn ImageResolver>,
}

impl RequestTranslator {
    pub fn new(images: Arc<dyn ImageResolver>) -> Self {
        Self { images }
    }

    /// Build the backend payload for `request`.
    ///
    /// # Returns
    ///
    /// The payload and one warning per unsupported field present on the
    /// request. Callers drop the warnings for streaming requests.
    ///
    /// # Errors
    ///
    /// `AppError::BadRequest` for an empty model, no messages, or a message
    /// whose content is an empty part list.
    pub async fn to_backend(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<(OllamaChatRequest, Vec<String>)> {
        if request.model.trim().is_empty() {
            return Err(AppError::BadRequest("model must not be empty".to_string()));
        }
        if request.messages.is_empty() {
            return Err(AppError::BadRequest(
                "messages must contain at least one message".to_string(),
            ));
        }

        let mut messages = Vec::with_capacity(request.messages.len());
        for (index, message) in request.messages.iter().enumerate() {
            messages.push(self.translate_message(index, message).await?);
        }

        let options = OllamaOptions {
            temperature: request.temperature,
            top_p: request.top_p,
            num_predict: request.max_tokens,
            stop: request.stop.clone().map(|s| s.into_vec()),
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            seed: request.seed,
        };

        let format = request
            .response_format
            .as_ref()
            .filter(|f| f.format_type == "json_object")
            .map(|_| "json".to_string());

        let payload = OllamaChatRequest {
            model: request.model.clone(),
            messages,
            stream: request.stream,
            options: (!options.is_empty()).then_some(options),
            format,
        };

        Ok((payload, unsupported_field_warnings(request)))
    }

    async fn translate_message(&self, index: usize, message: &ChatMessage) -> Result<OllamaMessage> {
        let role = message.role.as_str().to_string();
        match &message.content {
            MessageContent::Text(text) => Ok(OllamaMessage {
                role,
                content: text.clone(),
                images: Vec::new(),
            }),
            MessageContent::Parts(parts) => {
                if parts.is_empty() {
                    return Err(AppError::BadRequest(format!(
                        "messages[{}].content must not be an empty list",
                        index
                    )));
                }

                let mut images = Vec::new();
                for part in parts {
                    if let ContentPart::ImageUrl { image_url } = part {
                        if let Some(data) = self.images.resolve(&image_url.url).await {
                            images.push(data);
                        }
                    }
                }

                Ok(OllamaMessage {
                    role,
                    content: message.content.text(),
                    images,
                })
            }
        }
    }

    /// Map a complete backend reply to a wire response.
    pub fn from_backend(
        response: &OllamaChatResponse,
        model: &str,
        warnings: Vec<String>,
    ) -> ChatCompletionResponse {
        let message = response.message.clone().unwrap_or_default();
        let role = if message.role.is_empty() {
            "assistant".to_string()
        } else {
            message.role
        };

        ChatCompletionResponse {
            id: completion_id(),
            object: "chat.completion".to_string(),
            created: unix_now(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role,
                    content: message.content,
                },
                finish_reason: response.done.then(|| "stop".to_string()),
            }],
            usage: Usage::new(response.prompt_tokens(), response.completion_tokens()),
            warnings,
        }
    }

    /// Map one backend stream event to a wire chunk.
    ///
    /// The final event carries `finish_reason: "stop"` and, when
    /// `include_usage` is set, the backend-reported token counts.
    pub fn from_backend_chunk(
        event: &OllamaChatResponse,
        model: &str,
        include_usage: bool,
        completion_id: &str,
    ) -> ChatCompletionChunk {
        let delta = if event.done {
            Delta::default()
        } else {
            let message = event.message.clone().unwrap_or_default();
            Delta {
                role: Some(message.role).filter(|r| !r.is_empty()),
                content: Some(message.content),
            }
        };

        ChatCompletionChunk {
            id: completion_id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: unix_now(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: event.done.then(|| "stop".to_string()),
            }],
            usage: (event.done && include_usage)
                .then(|| Usage::new(event.prompt_tokens(), event.completion_tokens())),
        }
    }
}

/// One warning per unsupported field present on the request.
pub fn unsupported_field_warnings(request: &ChatCompletionRequest) -> Vec<String> {
    let present = [
        request.tools.is_some(),
        request.tool_choice.is_some(),
        request.logprobs.is_some(),
        request.logit_bias.is_some(),
    ];
    UNSUPPORTED_FIELDS
        .iter()
        .zip(present)
        .filter(|(_, present)| *present)
        .map(|(field, _)| {
            format!(
                "Parameter '{}' is not supported by the backend and was ignored",
                field
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::ollama::OllamaResponseMessage;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Resolves every URL to its own text, or drops URLs containing "broken".
    struct EchoResolver;

    #[async_trait]
    impl ImageResolver for EchoResolver {
        async fn resolve(&self, url: &str) -> Option<String> {
            (!url.contains("broken")).then(|| format!("b64:{}", url))
        }
    }

    fn translator() -> RequestTranslator {
        RequestTranslator::new(Arc::new(EchoResolver))
    }

    fn request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_text_messages_pass_through() {
        let req = request(json!({
            "model": "llama3.2:1b",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"}
            ]
        }));
        let (payload, warnings) = translator().to_backend(&req).await.unwrap();

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "model": "llama3.2:1b",
                "messages": [
                    {"role": "system", "content": "Be terse."},
                    {"role": "user", "content": "Hi"}
                ],
                "stream": false
            })
        );
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_sampling_parameters_mapped() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 0.2,
            "top_p": 0.9,
            "max_tokens": 64,
            "stop": "###",
            "seed": 7,
            "response_format": {"type": "json_object"},
            "stream": true
        }));
        let (payload, _) = translator().to_backend(&req).await.unwrap();

        let options = payload.options.unwrap();
        assert_eq!(options.temperature, Some(0.2));
        assert_eq!(options.top_p, Some(0.9));
        assert_eq!(options.num_predict, Some(64));
        assert_eq!(options.stop, Some(vec!["###".to_string()]));
        assert_eq!(options.seed, Some(7));
        assert_eq!(options.frequency_penalty, None);
        assert_eq!(payload.format.as_deref(), Some("json"));
        assert!(payload.stream);
    }

    #[tokio::test]
    async fn test_other_response_format_ignored() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "Hi"}],
            "response_format": {"type": "text"}
        }));
        let (payload, _) = translator().to_backend(&req).await.unwrap();
        assert_eq!(payload.format, None);
        assert_eq!(payload.options, None);
    }

    #[tokio::test]
    async fn test_multimodal_parts_joined_and_failed_images_dropped() {
        let req = request(json!({
            "model": "moondream",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Describe"},
                {"type": "image_url", "image_url": {"url": "http://img/one.png"}},
                {"type": "image_url", "image_url": {"url": "http://img/broken.png"}},
                {"type": "text", "text": "both images"}
            ]}]
        }));
        let (payload, _) = translator().to_backend(&req).await.unwrap();

        let message = &payload.messages[0];
        assert_eq!(message.content, "Describe both images");
        assert_eq!(message.images, vec!["b64:http://img/one.png".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let empty = request(json!({"model": "m", "messages": []}));
        assert!(matches!(
            translator().to_backend(&empty).await,
            Err(AppError::BadRequest(_))
        ));

        let empty_parts = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": []}]
        }));
        assert!(matches!(
            translator().to_backend(&empty_parts).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_fields_warn_and_are_not_forwarded() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{"type": "function", "function": {"name": "f"}}],
            "logit_bias": {"50256": -100}
        }));
        let (payload, warnings) = translator().to_backend(&req).await.unwrap();

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("'tools'"));
        assert!(warnings[1].contains("'logit_bias'"));
        let body = serde_json::to_value(&payload).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_from_backend_maps_usage_and_finish() {
        let reply = OllamaChatResponse {
            model: "llama3.2:1b".to_string(),
            message: Some(OllamaResponseMessage {
                role: "assistant".to_string(),
                content: "Hello!".to_string(),
            }),
            done: true,
            prompt_eval_count: Some(12),
            eval_count: Some(3),
            ..Default::default()
        };
        let response = RequestTranslator::from_backend(&reply, "llama3.2:1b", vec![]);

        assert!(response.id.starts_with("chatcmpl-"));
        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.model, "llama3.2:1b");
        assert_eq!(response.choices[0].message.content, "Hello!");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage, Usage::new(12, 3));
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_from_backend_not_done_has_no_finish_reason() {
        let reply = OllamaChatResponse::default();
        let response = RequestTranslator::from_backend(&reply, "m", vec![]);
        assert_eq!(response.choices[0].finish_reason, None);
        assert_eq!(response.choices[0].message.role, "assistant");
        assert_eq!(response.usage.total_tokens, 0);
    }

    #[test]
    fn test_from_backend_chunk_content_and_final() {
        let content = OllamaChatResponse {
            message: Some(OllamaResponseMessage {
                role: "assistant".to_string(),
                content: "Hel".to_string(),
            }),
            ..Default::default()
        };
        let chunk = RequestTranslator::from_backend_chunk(&content, "m", true, "chatcmpl-x");
        assert_eq!(chunk.id, "chatcmpl-x");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
        assert_eq!(chunk.choices[0].finish_reason, None);
        assert!(chunk.usage.is_none());

        let last = OllamaChatResponse {
            done: true,
            prompt_eval_count: Some(10),
            eval_count: Some(5),
            ..Default::default()
        };
        let chunk = RequestTranslator::from_backend_chunk(&last, "m", true, "chatcmpl-x");
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(chunk.choices[0].delta.content.is_none());
        assert_eq!(chunk.usage, Some(Usage::new(10, 5)));

        let chunk = RequestTranslator::from_backend_chunk(&last, "m", false, "chatcmpl-x");
        assert!(chunk.usage.is_none());
    }
}
