//! Per-user multi-window rate limiting.
//!
//! Five ceilings are evaluated in a fixed order: requests per minute, requests per
//! day, tokens per minute, tokens per day and the lifetime token limit. Minute
//! windows come from an in-process sliding log per user (sharded through a
//! [`DashMap`], so concurrent requests for different users never contend). Day and
//! lifetime windows are re-derived from the durable store on every check, which
//! keeps them correct across restarts and across processes. The minute windows
//! reset when the process restarts.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::error::{AppError, Result};
use crate::core::metrics::get_metrics;
use crate::core::store::{RateLimitPolicy, Store};

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const DAY_WINDOW_SECS: i64 = 86_400;

/// One rate-limit dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ceiling {
    RequestsPerMinute,
    RequestsPerDay,
    TokensPerMinute,
    TokensPerDay,
    TotalTokenLimit,
}

impl Ceiling {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestsPerMinute => "requests_per_minute",
            Self::RequestsPerDay => "requests_per_day",
            Self::TokensPerMinute => "tokens_per_minute",
            Self::TokensPerDay => "tokens_per_day",
            Self::TotalTokenLimit => "total_token_limit",
        }
    }

    /// Seconds a rejected caller should wait before retrying.
    pub const fn retry_after(self) -> Option<u64> {
        match self {
            Self::RequestsPerMinute | Self::TokensPerMinute => Some(60),
            Self::RequestsPerDay | Self::TokensPerDay => Some(3600),
            Self::TotalTokenLimit => None,
        }
    }

    fn message(self, limit: u64) -> String {
        match self {
            Self::RequestsPerMinute => {
                format!("Rate limit exceeded: {} requests per minute", limit)
            }
            Self::RequestsPerDay => format!("Rate limit exceeded: {} requests per day", limit),
            Self::TokensPerMinute => format!("Rate limit exceeded: {} tokens per minute", limit),
            Self::TokensPerDay => format!("Rate limit exceeded: {} tokens per day", limit),
            Self::TotalTokenLimit => format!("Total token limit exceeded: {} tokens", limit),
        }
    }
}

/// Sliding logs of request timestamps and token counts for one user.
#[derive(Debug, Default)]
pub struct WindowCounter {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
}

impl WindowCounter {
    fn prune(&mut self, now: Instant) {
        while let Some(ts) = self.requests.front() {
            if now.duration_since(*ts) < MINUTE_WINDOW {
                break;
            }
            self.requests.pop_front();
        }
        while let Some((ts, _)) = self.tokens.front() {
            if now.duration_since(*ts) < MINUTE_WINDOW {
                break;
            }
            self.tokens.pop_front();
        }
    }

    pub fn request_count(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.requests.len() as u64
    }

    pub fn token_count(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.tokens.iter().map(|(_, t)| *t).sum()
    }

    pub fn add_request(&mut self, now: Instant) {
        self.requests.push_back(now);
    }

    pub fn add_tokens(&mut self, now: Instant, tokens: u64) {
        if tokens > 0 {
            self.tokens.push_back((now, tokens));
        }
    }
}

/// Rate limiter shared by every request handler.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    counters: DashMap<String, WindowCounter>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            counters: DashMap::new(),
        }
    }

    /// Check every configured ceiling for `user_id`.
    ///
    /// On success the request is immediately counted in the minute window. The
    /// final minute check and the count share one map guard, so a concurrent
    /// burst cannot pass `requests_per_minute` while the store is queried.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the request is allowed
    /// * `Err(AppError::RateLimitExceeded)` naming the first violated ceiling
    pub async fn check(&self, user_id: &str) -> Result<()> {
        let policy = self
            .store
            .get_rate_limit_policy(user_id)
            .await?
            .unwrap_or_default();

        self.check_policy(user_id, &policy).await?;
        self.admit(user_id, active(policy.requests_per_minute))
    }

    fn admit(&self, user_id: &str, per_minute: Option<u64>) -> Result<()> {
        let now = Instant::now();
        let mut counter = self.counters.entry(user_id.to_string()).or_default();
        if let Some(limit) = per_minute {
            let current = counter.request_count(now);
            exceeded(user_id, Ceiling::RequestsPerMinute, limit, current)?;
        }
        counter.add_request(now);
        Ok(())
    }

    async fn check_policy(&self, user_id: &str, policy: &RateLimitPolicy) -> Result<()> {
        if let Some(limit) = active(policy.requests_per_minute) {
            let current = self.minute_requests(user_id);
            exceeded(user_id, Ceiling::RequestsPerMinute, limit, current)?;
        }

        if let Some(limit) = active(policy.requests_per_day) {
            let current = self
                .store
                .count_requests_in_window(user_id, DAY_WINDOW_SECS)
                .await?;
            exceeded(user_id, Ceiling::RequestsPerDay, limit, current.max(0) as u64)?;
        }

        if let Some(limit) = active(policy.tokens_per_minute) {
            let current = self.minute_tokens(user_id);
            exceeded(user_id, Ceiling::TokensPerMinute, limit, current)?;
        }

        if let Some(limit) = active(policy.tokens_per_day) {
            let current = self
                .store
                .count_tokens_in_window(user_id, DAY_WINDOW_SECS)
                .await?;
            exceeded(user_id, Ceiling::TokensPerDay, limit, current.max(0) as u64)?;
        }

        if let Some(limit) = active(policy.total_token_limit) {
            let current = self.store.lifetime_tokens(user_id).await?;
            exceeded(user_id, Ceiling::TotalTokenLimit, limit, current.max(0) as u64)?;
        }

        Ok(())
    }

    fn minute_requests(&self, user_id: &str) -> u64 {
        self.counters
            .get_mut(user_id)
            .map(|mut c| c.request_count(Instant::now()))
            .unwrap_or(0)
    }

    fn minute_tokens(&self, user_id: &str) -> u64 {
        self.counters
            .get_mut(user_id)
            .map(|mut c| c.token_count(Instant::now()))
            .unwrap_or(0)
    }

    /// Count an accepted request in the minute window.
    pub fn record_request(&self, user_id: &str) {
        self.counters
            .entry(user_id.to_string())
            .or_default()
            .add_request(Instant::now());
    }

    /// Append backend-reported tokens to the minute window.
    pub fn record_tokens(&self, user_id: &str, tokens: u64) {
        self.counters
            .entry(user_id.to_string())
            .or_default()
            .add_tokens(Instant::now(), tokens);
    }

    /// Number of users with an in-process window.
    pub fn tracked_users(&self) -> usize {
        self.counters.len()
    }
}

/// Non-positive ceilings are treated as unlimited.
fn active(limit: Option<i64>) -> Option<u64> {
    limit.filter(|l| *l > 0).map(|l| l as u64)
}

fn exceeded(user_id: &str, ceiling: Ceiling, limit: u64, current: u64) -> Result<()> {
    if current < limit {
        return Ok(());
    }

    tracing::warn!(
        user_id = %user_id,
        ceiling = ceiling.as_str(),
        limit = limit,
        current = current,
        "Rate limit exceeded"
    );
    get_metrics()
        .rate_limit_rejections
        .with_label_values(&[ceiling.as_str()])
        .inc();

    Err(AppError::RateLimitExceeded {
        ceiling,
        message: ceiling.message(limit),
        retry_after: ceiling.retry_after(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{AdminStore, MemoryStore, NewUsageRecord};
    use assert_matches::assert_matches;

    async fn limiter_with(policy: RateLimitPolicy) -> (RateLimiter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_user("user-1", "hash", "sk-***123", &policy)
            .await
            .unwrap();
        (RateLimiter::new(store.clone()), store)
    }

    fn usage(tokens: i64) -> NewUsageRecord {
        NewUsageRecord {
            user_id: "user-1".to_string(),
            model: "llama3".to_string(),
            prompt_tokens: tokens,
            completion_tokens: 0,
            total_tokens: tokens,
            cost: 0.0,
            request_id: None,
            prompt_preview: None,
        }
    }

    /// Store whose day-window count yields, so concurrent checks interleave.
    struct YieldingStore(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl Store for YieldingStore {
        async fn get_user_by_key_hash(
            &self,
            key_hash: &str,
        ) -> Result<Option<crate::core::store::UserEntity>> {
            self.0.get_user_by_key_hash(key_hash).await
        }

        async fn get_rate_limit_policy(&self, user_id: &str) -> Result<Option<RateLimitPolicy>> {
            self.0.get_rate_limit_policy(user_id).await
        }

        async fn count_requests_in_window(&self, user_id: &str, window_secs: i64) -> Result<i64> {
            tokio::task::yield_now().await;
            self.0.count_requests_in_window(user_id, window_secs).await
        }

        async fn count_tokens_in_window(&self, user_id: &str, window_secs: i64) -> Result<i64> {
            self.0.count_tokens_in_window(user_id, window_secs).await
        }

        async fn lifetime_tokens(&self, user_id: &str) -> Result<i64> {
            self.0.lifetime_tokens(user_id).await
        }

        async fn append_usage_record(&self, record: &NewUsageRecord) -> Result<()> {
            self.0.append_usage_record(record).await
        }

        async fn get_pricing(
            &self,
            model: &str,
        ) -> Result<Option<crate::core::store::PricingEntry>> {
            self.0.get_pricing(model).await
        }
    }

    #[test]
    fn test_ceiling_retry_after() {
        assert_eq!(Ceiling::RequestsPerMinute.retry_after(), Some(60));
        assert_eq!(Ceiling::TokensPerMinute.retry_after(), Some(60));
        assert_eq!(Ceiling::RequestsPerDay.retry_after(), Some(3600));
        assert_eq!(Ceiling::TokensPerDay.retry_after(), Some(3600));
        assert_eq!(Ceiling::TotalTokenLimit.retry_after(), None);
    }

    #[tokio::test]
    async fn test_concurrent_burst_respects_requests_per_minute() {
        let (_, store) = limiter_with(RateLimitPolicy {
            requests_per_minute: Some(3),
            requests_per_day: Some(1000),
            ..Default::default()
        })
        .await;
        let limiter = RateLimiter::new(Arc::new(YieldingStore(store)));

        let results = futures::future::join_all((0..10).map(|_| limiter.check("user-1"))).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert_matches!(
            results.iter().find(|r| r.is_err()),
            Some(Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::RequestsPerMinute,
                ..
            }))
        );
    }

    #[tokio::test]
    async fn test_requests_per_minute_blocks_third_request() {
        let (limiter, _) = limiter_with(RateLimitPolicy {
            requests_per_minute: Some(2),
            ..Default::default()
        })
        .await;

        assert!(limiter.check("user-1").await.is_ok());
        assert!(limiter.check("user-1").await.is_ok());
        assert_matches!(
            limiter.check("user-1").await,
            Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::RequestsPerMinute,
                retry_after: Some(60),
                ..
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_window_slides() {
        let (limiter, _) = limiter_with(RateLimitPolicy {
            requests_per_minute: Some(1),
            ..Default::default()
        })
        .await;

        assert!(limiter.check("user-1").await.is_ok());
        assert!(limiter.check("user-1").await.is_err());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(limiter.check("user-1").await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.check("user-1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_per_minute_uses_recorded_tokens() {
        let (limiter, _) = limiter_with(RateLimitPolicy {
            tokens_per_minute: Some(100),
            ..Default::default()
        })
        .await;

        assert!(limiter.check("user-1").await.is_ok());
        limiter.record_tokens("user-1", 60);
        assert!(limiter.check("user-1").await.is_ok());
        limiter.record_tokens("user-1", 40);

        assert_matches!(
            limiter.check("user-1").await,
            Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::TokensPerMinute,
                ..
            })
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("user-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_day_and_lifetime_ceilings_read_store() {
        let (limiter, store) = limiter_with(RateLimitPolicy {
            requests_per_day: Some(2),
            ..Default::default()
        })
        .await;

        store.append_usage_record(&usage(5)).await.unwrap();
        assert!(limiter.check("user-1").await.is_ok());
        store.append_usage_record(&usage(5)).await.unwrap();
        assert_matches!(
            limiter.check("user-1").await,
            Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::RequestsPerDay,
                retry_after: Some(3600),
                ..
            })
        );

        let (limiter, store) = limiter_with(RateLimitPolicy {
            total_token_limit: Some(10),
            ..Default::default()
        })
        .await;
        store.append_usage_record(&usage(10)).await.unwrap();
        assert_matches!(
            limiter.check("user-1").await,
            Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::TotalTokenLimit,
                retry_after: None,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_first_violated_ceiling_wins() {
        let (limiter, store) = limiter_with(RateLimitPolicy {
            requests_per_minute: Some(1),
            tokens_per_day: Some(1),
            ..Default::default()
        })
        .await;
        store.append_usage_record(&usage(50)).await.unwrap();

        assert_matches!(
            limiter.check("user-1").await,
            Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::TokensPerDay,
                ..
            })
        );

        limiter.record_request("user-1");
        assert_matches!(
            limiter.check("user-1").await,
            Err(AppError::RateLimitExceeded {
                ceiling: Ceiling::RequestsPerMinute,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let (limiter, _) = limiter_with(RateLimitPolicy::default()).await;
        for _ in 0..500 {
            assert!(limiter.check("user-1").await.is_ok());
        }
        limiter.record_tokens("user-1", 1_000_000);
        assert!(limiter.check("user-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_counted() {
        let (limiter, _) = limiter_with(RateLimitPolicy {
            requests_per_minute: Some(1),
            ..Default::default()
        })
        .await;

        assert!(limiter.check("user-1").await.is_ok());
        for _ in 0..5 {
            assert!(limiter.check("user-1").await.is_err());
        }
        let count = limiter
            .counters
            .get_mut("user-1")
            .map(|mut c| c.request_count(Instant::now()))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let policy = RateLimitPolicy {
            requests_per_minute: Some(1),
            ..Default::default()
        };
        store.create_user("a", "ha", "p", &policy).await.unwrap();
        store.create_user("b", "hb", "p", &policy).await.unwrap();
        let limiter = RateLimiter::new(store);

        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_err());
        assert!(limiter.check("b").await.is_ok());
        assert_eq!(limiter.tracked_users(), 2);
    }
}
