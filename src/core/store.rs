//! Durable store abstraction.
//!
//! [`Store`] is the narrow surface the request path depends on (credential lookup,
//! rate-limit policy, windowed usage counts, usage append, pricing lookup).
//! [`AdminStore`] extends it with the user, limit and pricing administration used by
//! the admin and usage endpoints. [`crate::core::database::Database`] implements both
//! against PostgreSQL; [`MemoryStore`] implements both in-process.

use crate::core::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use utoipa::ToSchema;

/// A registered API user. Only the SHA-256 hash of the key is stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct UserEntity {
    pub id: String,
    pub key_hash: String,
    /// Masked key (e.g., "sk-***f3a")
    pub key_preview: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user ceilings. `None` means unlimited for that dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "requests_per_minute": 60,
    "requests_per_day": 1000,
    "tokens_per_minute": 100000,
    "tokens_per_day": 1000000,
    "total_token_limit": null
}))]
pub struct RateLimitPolicy {
    pub requests_per_minute: Option<i64>,
    pub requests_per_day: Option<i64>,
    pub tokens_per_minute: Option<i64>,
    pub tokens_per_day: Option<i64>,
    pub total_token_limit: Option<i64>,
}

/// Partial update of a [`RateLimitPolicy`]; absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"requests_per_minute": 30, "tokens_per_day": 500000}))]
pub struct RateLimitUpdate {
    pub requests_per_minute: Option<i64>,
    pub requests_per_day: Option<i64>,
    pub tokens_per_minute: Option<i64>,
    pub tokens_per_day: Option<i64>,
    pub total_token_limit: Option<i64>,
}

impl RateLimitUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, policy: &mut RateLimitPolicy) {
        if let Some(v) = self.requests_per_minute {
            policy.requests_per_minute = Some(v);
        }
        if let Some(v) = self.requests_per_day {
            policy.requests_per_day = Some(v);
        }
        if let Some(v) = self.tokens_per_minute {
            policy.tokens_per_minute = Some(v);
        }
        if let Some(v) = self.tokens_per_day {
            policy.tokens_per_day = Some(v);
        }
        if let Some(v) = self.total_token_limit {
            policy.total_token_limit = Some(v);
        }
    }
}

/// Usage row to be appended; written exactly once per completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUsageRecord {
    pub user_id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
    pub request_id: Option<String>,
    pub prompt_preview: Option<String>,
}

/// Persisted usage row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct UsageRecord {
    pub id: i64,
    pub user_id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
    pub request_id: Option<String>,
    pub prompt_preview: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "model": "llama3.2",
    "input_cost_per_million": 0.5,
    "output_cost_per_million": 1.5,
    "created_at": "2024-01-01T00:00:00Z",
    "updated_at": "2024-01-01T00:00:00Z"
}))]
pub struct PricingEntry {
    pub model: String,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PricingHistoryEntry {
    pub id: i64,
    pub model: String,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    pub changed_by: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Aggregated usage for one model.
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ModelUsage {
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_cost: f64,
    pub request_count: i64,
}

/// Aggregated usage for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UsageStats {
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_cost: f64,
    pub request_count: i64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

/// Store operations needed on every gateway request.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_by_key_hash(&self, key_hash: &str) -> Result<Option<UserEntity>>;

    async fn get_rate_limit_policy(&self, user_id: &str) -> Result<Option<RateLimitPolicy>>;

    async fn count_requests_in_window(&self, user_id: &str, window_secs: i64) -> Result<i64>;

    async fn count_tokens_in_window(&self, user_id: &str, window_secs: i64) -> Result<i64>;

    async fn lifetime_tokens(&self, user_id: &str) -> Result<i64>;

    /// Persist one usage record atomically.
    async fn append_usage_record(&self, record: &NewUsageRecord) -> Result<()>;

    async fn get_pricing(&self, model: &str) -> Result<Option<PricingEntry>>;
}

/// Administration operations for users, limits and pricing.
#[async_trait]
pub trait AdminStore: Store {
    async fn create_user(
        &self,
        user_id: &str,
        key_hash: &str,
        key_preview: &str,
        limits: &RateLimitPolicy,
    ) -> Result<UserEntity>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserEntity>>;

    async fn list_users(&self) -> Result<Vec<UserEntity>>;

    /// Remove a user and its limits. Usage history is kept.
    async fn delete_user(&self, user_id: &str) -> Result<bool>;

    /// Remove every user, limit and usage row. Returns the number of users removed.
    async fn delete_all_users(&self) -> Result<u64>;

    async fn update_rate_limits(
        &self,
        user_id: &str,
        update: &RateLimitUpdate,
    ) -> Result<Option<RateLimitPolicy>>;

    async fn usage_stats(&self, user_id: &str) -> Result<UsageStats>;

    /// Insert or replace pricing for a model and append a history entry.
    async fn set_pricing(
        &self,
        model: &str,
        input_cost_per_million: f64,
        output_cost_per_million: f64,
        changed_by: Option<&str>,
    ) -> Result<PricingEntry>;

    async fn list_pricing(&self) -> Result<Vec<PricingEntry>>;

    async fn delete_pricing(&self, model: &str) -> Result<bool>;

    async fn pricing_history(&self, model: Option<&str>) -> Result<Vec<PricingHistoryEntry>>;
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, UserEntity>,
    limits: HashMap<String, RateLimitPolicy>,
    usage: Vec<UsageRecord>,
    pricing: HashMap<String, PricingEntry>,
    history: Vec<PricingHistoryEntry>,
}

/// In-process store used by tests and by `DB_URL=memory://`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }

    /// Snapshot of every usage row, oldest first.
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.state().map(|s| s.usage.clone()).unwrap_or_default()
    }

    fn usage_since(state: &MemoryState, user_id: &str, window_secs: i64) -> Vec<UsageRecord> {
        let cutoff = Utc::now() - Duration::seconds(window_secs);
        state
            .usage
            .iter()
            .filter(|r| r.user_id == user_id && r.timestamp > cutoff)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user_by_key_hash(&self, key_hash: &str) -> Result<Option<UserEntity>> {
        let state = self.state()?;
        Ok(state.users.values().find(|u| u.key_hash == key_hash).cloned())
    }

    async fn get_rate_limit_policy(&self, user_id: &str) -> Result<Option<RateLimitPolicy>> {
        Ok(self.state()?.limits.get(user_id).copied())
    }

    async fn count_requests_in_window(&self, user_id: &str, window_secs: i64) -> Result<i64> {
        let state = self.state()?;
        Ok(Self::usage_since(&state, user_id, window_secs).len() as i64)
    }

    async fn count_tokens_in_window(&self, user_id: &str, window_secs: i64) -> Result<i64> {
        let state = self.state()?;
        Ok(Self::usage_since(&state, user_id, window_secs)
            .iter()
            .map(|r| r.total_tokens)
            .sum())
    }

    async fn lifetime_tokens(&self, user_id: &str) -> Result<i64> {
        let state = self.state()?;
        Ok(state
            .usage
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.total_tokens)
            .sum())
    }

    async fn append_usage_record(&self, record: &NewUsageRecord) -> Result<()> {
        let mut state = self.state()?;
        let id = state.usage.len() as i64 + 1;
        state.usage.push(UsageRecord {
            id,
            user_id: record.user_id.clone(),
            model: record.model.clone(),
            prompt_tokens: record.prompt_tokens,
            completion_tokens: record.completion_tokens,
            total_tokens: record.total_tokens,
            cost: record.cost,
            request_id: record.request_id.clone(),
            prompt_preview: record.prompt_preview.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_pricing(&self, model: &str) -> Result<Option<PricingEntry>> {
        Ok(self.state()?.pricing.get(model).cloned())
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn create_user(
        &self,
        user_id: &str,
        key_hash: &str,
        key_preview: &str,
        limits: &RateLimitPolicy,
    ) -> Result<UserEntity> {
        let mut state = self.state()?;
        if state.users.contains_key(user_id) {
            return Err(AppError::Conflict(format!("User '{}' already exists", user_id)));
        }
        let user = UserEntity {
            id: user_id.to_string(),
            key_hash: key_hash.to_string(),
            key_preview: key_preview.to_string(),
            created_at: Utc::now(),
        };
        state.users.insert(user_id.to_string(), user.clone());
        state.limits.insert(user_id.to_string(), *limits);
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserEntity>> {
        Ok(self.state()?.users.get(user_id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserEntity>> {
        let mut users: Vec<UserEntity> = self.state()?.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        state.limits.remove(user_id);
        Ok(state.users.remove(user_id).is_some())
    }

    async fn delete_all_users(&self) -> Result<u64> {
        let mut state = self.state()?;
        let count = state.users.len() as u64;
        state.users.clear();
        state.limits.clear();
        state.usage.clear();
        Ok(count)
    }

    async fn update_rate_limits(
        &self,
        user_id: &str,
        update: &RateLimitUpdate,
    ) -> Result<Option<RateLimitPolicy>> {
        let mut state = self.state()?;
        Ok(state.limits.get_mut(user_id).map(|policy| {
            update.apply_to(policy);
            *policy
        }))
    }

    async fn usage_stats(&self, user_id: &str) -> Result<UsageStats> {
        let state = self.state()?;
        let mut stats = UsageStats::default();
        for record in state.usage.iter().filter(|r| r.user_id == user_id) {
            stats.total_tokens += record.total_tokens;
            stats.prompt_tokens += record.prompt_tokens;
            stats.completion_tokens += record.completion_tokens;
            stats.total_cost += record.cost;
            stats.request_count += 1;

            let model = stats.by_model.entry(record.model.clone()).or_default();
            model.total_tokens += record.total_tokens;
            model.prompt_tokens += record.prompt_tokens;
            model.completion_tokens += record.completion_tokens;
            model.total_cost += record.cost;
            model.request_count += 1;
        }
        Ok(stats)
    }

    async fn set_pricing(
        &self,
        model: &str,
        input_cost_per_million: f64,
        output_cost_per_million: f64,
        changed_by: Option<&str>,
    ) -> Result<PricingEntry> {
        let mut state = self.state()?;
        let now = Utc::now();
        let created_at = state
            .pricing
            .get(model)
            .map(|p| p.created_at)
            .unwrap_or(now);
        let entry = PricingEntry {
            model: model.to_string(),
            input_cost_per_million,
            output_cost_per_million,
            created_at,
            updated_at: now,
        };
        state.pricing.insert(model.to_string(), entry.clone());

        let id = state.history.len() as i64 + 1;
        state.history.push(PricingHistoryEntry {
            id,
            model: model.to_string(),
            input_cost_per_million,
            output_cost_per_million,
            changed_by: changed_by.map(str::to_string),
            changed_at: now,
        });
        Ok(entry)
    }

    async fn list_pricing(&self) -> Result<Vec<PricingEntry>> {
        let mut pricing: Vec<PricingEntry> = self.state()?.pricing.values().cloned().collect();
        pricing.sort_by(|a, b| a.model.cmp(&b.model));
        Ok(pricing)
    }

    async fn delete_pricing(&self, model: &str) -> Result<bool> {
        Ok(self.state()?.pricing.remove(model).is_some())
    }

    async fn pricing_history(&self, model: Option<&str>) -> Result<Vec<PricingHistoryEntry>> {
        let state = self.state()?;
        let mut history: Vec<PricingHistoryEntry> = state
            .history
            .iter()
            .filter(|h| model.map_or(true, |m| h.model == m))
            .cloned()
            .collect();
        history.reverse();
        Ok(history)
    }
}
