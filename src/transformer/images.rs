//! Image part resolution for multimodal messages.
//!
//! Ollama takes raw base64 image data. Inline `data:` URLs are unpacked
//! locally; external URLs are fetched with a bounded timeout. Any failure
//! drops the image instead of failing the request.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;

use crate::core::config::UploadConfig;

/// Resolves an image URL to base64 data.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// `None` when the image cannot be resolved.
    async fn resolve(&self, url: &str) -> Option<String>;
}

/// Resolver backed by a shared reqwest client.
pub struct HttpImageResolver {
    client: reqwest::Client,
    timeout: Duration,
    upload: UploadConfig,
}

impl HttpImageResolver {
    pub fn new(client: reqwest::Client, timeout: Duration, upload: UploadConfig) -> Self {
        Self {
            client,
            timeout,
            upload,
        }
    }

    fn resolve_data_url(&self, url: &str) -> Option<String> {
        let (header, data) = url.split_once(',')?;
        let mime = header
            .trim_start_matches("data:")
            .split(';')
            .next()
            .unwrap_or_default();
        if !mime.is_empty() && !self.upload.is_allowed_image_type(mime) {
            tracing::debug!(mime = %mime, "Dropping inline image with disallowed type");
            return None;
        }

        let decoded = STANDARD.decode(data.trim()).ok()?;
        if decoded.len() as u64 > self.upload.max_upload_bytes() {
            tracing::debug!(bytes = decoded.len(), "Dropping oversized inline image");
            return None;
        }
        Some(data.trim().to_string())
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let mime = content_type.split(';').next().unwrap_or_default().trim();
            if !self.upload.is_allowed_image_type(mime) {
                return Err(format!("disallowed content type {}", mime));
            }
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if bytes.len() as u64 > self.upload.max_upload_bytes() {
            return Err(format!("image too large ({} bytes)", bytes.len()));
        }
        Ok(STANDARD.encode(&bytes))
    }
}

#[async_trait]
impl ImageResolver for HttpImageResolver {
    async fn resolve(&self, url: &str) -> Option<String> {
        if url.starts_with("data:") {
            return self.resolve_data_url(url);
        }

        match self.fetch(url).await {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Dropping image that failed to fetch");
                None
            }
        }
    }
}
