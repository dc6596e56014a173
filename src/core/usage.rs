//! Cost computation and usage persistence.

use std::sync::Arc;

use crate::core::error::{AppError, Result};
use crate::core::metrics::get_metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::core::store::{NewUsageRecord, PricingEntry, Store};

/// Maximum characters of the last user text kept on a usage record.
pub const PROMPT_PREVIEW_CHARS: usize = 200;

/// Cost of one exchange in the pricing entry's currency.
///
/// Zero when the model has no pricing.
pub fn cost(pricing: Option<&PricingEntry>, prompt_tokens: i64, completion_tokens: i64) -> f64 {
    match pricing {
        Some(p) => {
            (prompt_tokens as f64 / 1_000_000.0) * p.input_cost_per_million
                + (completion_tokens as f64 / 1_000_000.0) * p.output_cost_per_million
        }
        None => 0.0,
    }
}

/// Truncate a prompt to at most [`PROMPT_PREVIEW_CHARS`] characters.
pub fn prompt_preview(text: &str) -> String {
    text.chars().take(PROMPT_PREVIEW_CHARS).collect()
}

/// Token counts of one finished exchange, ready to be settled.
#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub user_id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub request_id: Option<String>,
    pub prompt_preview: Option<String>,
}

impl CompletedExchange {
    pub fn total_tokens(&self) -> u64 {
        (self.prompt_tokens + self.completion_tokens).max(0) as u64
    }
}

/// Writes one usage record per completed request.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn Store>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Cost for `model` using the current pricing table.
    pub async fn cost(&self, model: &str, prompt_tokens: i64, completion_tokens: i64) -> Result<f64> {
        let pricing = self.store.get_pricing(model).await?;
        Ok(cost(pricing.as_ref(), prompt_tokens, completion_tokens))
    }

    /// Persist one usage record and return it.
    pub async fn record(
        &self,
        user_id: &str,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        request_id: Option<String>,
        prompt_preview: Option<String>,
    ) -> Result<NewUsageRecord> {
        let cost = self.cost(model, prompt_tokens, completion_tokens).await?;
        let record = NewUsageRecord {
            user_id: user_id.to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost,
            request_id,
            prompt_preview: prompt_preview.map(|p| self::prompt_preview(&p)),
        };

        self.store.append_usage_record(&record).await?;

        let metrics = get_metrics();
        metrics
            .token_usage
            .with_label_values(&[model, "prompt"])
            .inc_by(prompt_tokens.max(0) as u64);
        metrics
            .token_usage
            .with_label_values(&[model, "completion"])
            .inc_by(completion_tokens.max(0) as u64);

        tracing::debug!(
            user_id = %user_id,
            model = %model,
            prompt_tokens = prompt_tokens,
            completion_tokens = completion_tokens,
            cost = cost,
            "Usage recorded"
        );

        Ok(record)
    }

    /// Record `exchange` and charge its tokens to the minute window.
    ///
    /// The write runs on its own task, so dropping the caller (a client
    /// disconnect) cannot cancel it halfway.
    pub async fn settle(
        &self,
        limiter: &Arc<RateLimiter>,
        exchange: CompletedExchange,
    ) -> Result<NewUsageRecord> {
        let recorder = self.clone();
        let limiter = limiter.clone();
        let write = tokio::spawn(async move {
            limiter.record_tokens(&exchange.user_id, exchange.total_tokens());
            recorder
                .record(
                    &exchange.user_id,
                    &exchange.model,
                    exchange.prompt_tokens,
                    exchange.completion_tokens,
                    exchange.request_id,
                    exchange.prompt_preview,
                )
                .await
        });

        write
            .await
            .map_err(|e| AppError::Internal(format!("Usage write task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{AdminStore, MemoryStore};
    use chrono::Utc;

    fn pricing(input: f64, output: f64) -> PricingEntry {
        PricingEntry {
            model: "llama3".to_string(),
            input_cost_per_million: input,
            output_cost_per_million: output,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_cost_unpriced_is_zero() {
        assert_eq!(cost(None, 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn test_cost_formula() {
        let p = pricing(2.0, 6.0);
        let c = cost(Some(&p), 500_000, 250_000);
        assert!((c - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_prompt_preview_truncates_on_chars() {
        let long = "é".repeat(500);
        let preview = prompt_preview(&long);
        assert_eq!(preview.chars().count(), PROMPT_PREVIEW_CHARS);
        assert_eq!(prompt_preview("short"), "short");
    }

    #[tokio::test]
    async fn test_record_persists_once_with_cost() {
        let store = Arc::new(MemoryStore::new());
        store.set_pricing("llama3", 1.0, 2.0, None).await.unwrap();
        let recorder = UsageRecorder::new(store.clone());

        let record = recorder
            .record(
                "alice",
                "llama3",
                1_000_000,
                500_000,
                Some("req-1".to_string()),
                Some("x".repeat(300)),
            )
            .await
            .unwrap();

        assert_eq!(record.total_tokens, 1_500_000);
        assert!((record.cost - 2.0).abs() < 1e-9);

        let rows = store.usage_records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_id.as_deref(), Some("req-1"));
        assert_eq!(rows[0].prompt_preview.as_ref().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_settle_records_and_charges_minute_window() {
        let store = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::new(store.clone());
        let limiter = Arc::new(RateLimiter::new(store.clone()));

        let record = recorder
            .settle(
                &limiter,
                CompletedExchange {
                    user_id: "bob".to_string(),
                    model: "unpriced".to_string(),
                    prompt_tokens: 7,
                    completion_tokens: 3,
                    request_id: None,
                    prompt_preview: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(record.total_tokens, 10);
        assert_eq!(record.cost, 0.0);
        assert_eq!(store.usage_records().len(), 1);
        assert_eq!(limiter.tracked_users(), 1);
    }
}
