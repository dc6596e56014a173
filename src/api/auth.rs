//! Shared authentication module.
//!
//! Gateway callers authenticate with `Authorization: Bearer <api key>`; keys are
//! stored as SHA-256 hashes and looked up through the [`Store`]. The admin API
//! uses a single shared key from configuration.

use axum::http::HeaderMap;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::core::error::Result;
use crate::core::store::{Store, UserEntity};
use crate::core::AppError;

// ============================================================================
// Helper Functions
// ============================================================================

/// Hash an API key using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Masked form of a key, safe to show in listings ("sk-***f3a").
pub fn create_key_preview(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("sk-***{}", tail)
}

/// Generate a fresh API key for `user_id`.
pub fn generate_api_key(user_id: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("sk-{}-{}", user_id, hex::encode(bytes))
}

/// Extract Bearer token from Authorization header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

// ============================================================================
// Main Authentication Functions
// ============================================================================

/// Resolve the calling user from the request headers.
///
/// # Returns
///
/// * `Ok(user)` - the key matched a registered user
/// * `Err(AppError::Unauthorized)` - header missing, malformed, or key unknown
pub async fn resolve_user(store: &dyn Store, headers: &HeaderMap) -> Result<UserEntity> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let key = header.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Unauthorized(
            "Invalid Authorization header format. Use 'Bearer <api_key>'".to_string(),
        )
    })?;

    let user = store
        .get_user_by_key_hash(&hash_key(key))
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;

    tracing::debug!(user_id = %user.id, "Authentication successful");
    Ok(user)
}

/// Outcome of checking the admin bearer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAuthFailure {
    /// No usable bearer credential
    Missing,
    /// A credential was presented but does not match
    Invalid,
}

/// Verify the admin bearer key.
pub fn check_admin_key(
    headers: &HeaderMap,
    admin_key: &str,
) -> std::result::Result<(), AdminAuthFailure> {
    let provided = extract_bearer(headers).ok_or(AdminAuthFailure::Missing)?;
    if admin_key.is_empty() || provided != admin_key {
        return Err(AdminAuthFailure::Invalid);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
