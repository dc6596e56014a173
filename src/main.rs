//! Ollama Gateway - Main entry point
//!
//! This binary loads configuration, connects the store, and runs the HTTP server
//! with all routes and middleware.

use anyhow::Result;
use chrono::Local;
use ollama_gateway::{
    api::{build_router, AdminState, AppState},
    core::{init_metrics, AdminStore, AppConfig, Database, DatabaseConfig, MemoryStore},
    services::{create_http_client, OllamaClient},
    transformer::HttpImageResolver,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MEMORY_STORE_URL: &str = "memory://";

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(|| detect_cpu_limit().unwrap_or(1));

    println!("Tokio runtime: using {} worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn init_tracing() {
    // NO_COLOR disables ANSI codes for file logging
    let no_color = std::env::var("NO_COLOR").is_ok();

    // Noise suppression for HTTP libraries is always appended, otherwise a bare
    // RUST_LOG=trace would let hyper's chunk logs through.
    let base_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ollama_gateway=debug".to_string());
    let filter_str = format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn,sqlx=warn",
        base_filter
    );
    let filter = tracing_subscriber::EnvFilter::new(filter_str);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTime)
                .with_ansi(!no_color),
        )
        .init();
}

async fn async_main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = AppConfig::load_default()?;

    let http_client = create_http_client(&config.ollama)?;
    let backend = Arc::new(OllamaClient::new(http_client.clone(), &config.ollama));
    let images = Arc::new(HttpImageResolver::new(
        http_client,
        Duration::from_secs(config.ollama.image_fetch_timeout_secs),
        config.upload.clone(),
    ));

    let (state, admin_store) = if config.db_url.trim() == MEMORY_STORE_URL {
        tracing::warn!("Using in-memory store; users and usage are lost on restart");
        let store = Arc::new(MemoryStore::new());
        let admin_store: Arc<dyn AdminStore> = store.clone();
        let state = AppState::new(
            store,
            backend,
            images,
            config.ollama.max_concurrent,
            config.ollama.base_url.clone(),
        );
        (state, admin_store)
    } else {
        let db_config = DatabaseConfig::from_url(&config.db_url);
        tracing::info!("Connecting to database...");
        let db = Database::connect(&db_config).await?;
        tracing::info!("Database connected successfully");

        if !db.check_migrations().await? {
            return Err(anyhow::anyhow!(
                "Database migrations not applied. Apply migrations/0001_init.sql first."
            ));
        }

        let store = Arc::new(db);
        let admin_store: Arc<dyn AdminStore> = store.clone();
        let state = AppState::new(
            store,
            backend,
            images,
            config.ollama.max_concurrent,
            config.ollama.base_url.clone(),
        );
        (state, admin_store)
    };

    let admin_state = Arc::new(AdminState {
        store: admin_store,
        admin_key: config.admin_key.clone(),
        default_limits: config.default_limits,
    });

    let app = build_router(Arc::new(state), admin_state);

    let ip: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HOST '{}': {}", config.server.host, e))?;
    let addr = SocketAddr::new(ip, config.server.port);

    tracing::info!("Starting Ollama Gateway on {}", addr);
    tracing::info!("Forwarding requests to {}", config.ollama.base_url);
    tracing::info!(
        "Ollama concurrency: {} in-flight calls",
        config.ollama.max_concurrent
    );
    tracing::info!("OpenAI API: /v1/chat/completions, /v1/models");
    tracing::info!("Usage API: /v1/usage, /v1/usage/summary, /v1/pricing");
    tracing::info!("Admin API: /admin/v1/*");
    tracing::info!("Swagger UI: /swagger-ui");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Detect CPU limit from cgroup (for containerized environments)
fn detect_cpu_limit() -> Option<usize> {
    // Try cgroup v2 first
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let parts: Vec<&str> = max.split_whitespace().collect();
        if parts.len() == 2 {
            if let (Ok(quota), Ok(period)) = (parts[0].parse::<i64>(), parts[1].parse::<i64>()) {
                if quota > 0 {
                    let cores = ((quota as f64 / period as f64).ceil() as usize).max(1);
                    println!("Detected CPU limit from cgroup v2: {} cores", cores);
                    return Some(cores);
                }
            }
        }
    }

    // Fallback to cgroup v1
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;

    if quota > 0 {
        let cores = ((quota as f64 / period as f64).ceil() as usize).max(1);
        println!("Detected CPU limit from cgroup v1: {} cores", cores);
        Some(cores)
    } else {
        None
    }
}
