//! Configuration management for the gateway.
//!
//! Configuration comes from environment variables, optionally layered on top
//! of a YAML file (named by `CONFIG_PATH`) that may reference environment
//! variables with `${VAR}` / `${VAR:-default}`. Environment variables always
//! take precedence over the file.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::core::store::RateLimitPolicy;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// Ollama backend connection settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// PostgreSQL URL, or `memory://` for the in-process store
    #[serde(default)]
    pub db_url: String,

    /// Bearer token for the admin API
    #[serde(default)]
    pub admin_key: String,

    /// Limits assigned to newly created users
    #[serde(default = "default_user_limits")]
    pub default_limits: RateLimitPolicy,

    #[serde(default)]
    pub upload: UploadConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Maximum simultaneous backend calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total timeout for one backend call, including a full stream
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for fetching external image URLs
    #[serde(default = "default_image_fetch_timeout")]
    pub image_fetch_timeout_secs: u64,

    /// Whether to verify TLS certificates of the backend
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            max_concurrent: default_max_concurrent(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            image_fetch_timeout_secs: default_image_fetch_timeout(),
            verify_ssl: default_verify_ssl(),
        }
    }
}

/// Upload validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,

    #[serde(default = "default_allowed_image_types")]
    pub allowed_image_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: default_max_upload_size_mb(),
            allowed_image_types: default_allowed_image_types(),
        }
    }
}

impl UploadConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }

    pub fn is_allowed_image_type(&self, mime: &str) -> bool {
        self.allowed_image_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(mime))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ollama: OllamaConfig::default(),
            db_url: String::new(),
            admin_key: String::new(),
            default_limits: default_user_limits(),
            upload: UploadConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    120
}

fn default_image_fetch_timeout() -> u64 {
    30
}

fn default_verify_ssl() -> bool {
    true
}

fn default_max_upload_size_mb() -> u64 {
    10
}

fn default_allowed_image_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/gif", "image/webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_user_limits() -> RateLimitPolicy {
    RateLimitPolicy {
        requests_per_minute: Some(60),
        requests_per_day: Some(1000),
        tokens_per_minute: Some(100_000),
        tokens_per_day: Some(1_000_000),
        total_token_limit: None,
    }
}

impl AppConfig {
    /// Load configuration from `CONFIG_PATH` if set, otherwise from the environment.
    pub fn load_default() -> Result<Self> {
        let config = match std::env::var("CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => Self::load(&path)?,
            _ => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables and defaults only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ollama_gateway::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("config.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let expanded = expand_env_vars(&content);

        let mut config: AppConfig = serde_yaml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Required settings must be present before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.db_url.trim().is_empty() {
            anyhow::bail!("DB_URL environment variable is required");
        }
        if self.admin_key.trim().is_empty() {
            anyhow::bail!("ADMIN_KEY environment variable is required");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("PORT") {
            self.server.port = port;
        }

        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.ollama.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(n) = env_parse("OLLAMA_MAX_CONCURRENT") {
            self.ollama.max_concurrent = n;
        }
        if let Some(secs) = env_parse("OLLAMA_CONNECT_TIMEOUT_SECS") {
            self.ollama.connect_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("OLLAMA_REQUEST_TIMEOUT_SECS") {
            self.ollama.request_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("IMAGE_FETCH_TIMEOUT_SECS") {
            self.ollama.image_fetch_timeout_secs = secs;
        }
        if let Ok(verify) = std::env::var("OLLAMA_VERIFY_SSL") {
            self.ollama.verify_ssl = str_to_bool(&verify);
        }

        if let Ok(url) = std::env::var("DB_URL") {
            self.db_url = url;
        }
        if let Ok(key) = std::env::var("ADMIN_KEY") {
            self.admin_key = key;
        }

        let limits = &mut self.default_limits;
        env_limit("DEFAULT_REQUESTS_PER_MINUTE", &mut limits.requests_per_minute);
        env_limit("DEFAULT_REQUESTS_PER_DAY", &mut limits.requests_per_day);
        env_limit("DEFAULT_TOKENS_PER_MINUTE", &mut limits.tokens_per_minute);
        env_limit("DEFAULT_TOKENS_PER_DAY", &mut limits.tokens_per_day);
        env_limit("DEFAULT_TOTAL_TOKEN_LIMIT", &mut limits.total_token_limit);

        if let Some(mb) = env_parse("MAX_UPLOAD_SIZE_MB") {
            self.upload.max_upload_size_mb = mb;
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// An empty value or "none" clears the limit; a number sets it.
fn env_limit(name: &str, slot: &mut Option<i64>) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        *slot = None;
    } else if let Ok(value) = raw.parse::<i64>() {
        *slot = Some(value);
    } else {
        tracing::warn!(name = name, value = raw, "Ignoring unparsable limit");
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r#"["']?\$\{([^}:]+)(?::?-?([^}]*))?\}["']?"#)
            .expect("env var pattern is a valid regex")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
pub fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
