mod handlers;
mod metrics;
mod queue;
mod routes;

use anyhow::Context;
use axum::Router;
use gauntlet_common::languages::{LanguageRegistry, DEFAULT_LANGUAGES_PATH};
use gauntlet_common::storage::{RedisStorage, Storage};
use gauntlet_common::types::EvaluationOptions;
use gauntlet_common::validator::ValidationOptions;
use queue::{RedisQueue, SubmissionQueue};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<dyn SubmissionQueue>,
    pub languages: LanguageRegistry,
    pub validation: ValidationOptions,
    /// Applied to every queued submission
    pub evaluation: EvaluationOptions,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Operator-chosen evaluation settings for submissions queued by this API
fn evaluation_options_from_env() -> anyhow::Result<EvaluationOptions> {
    let defaults = EvaluationOptions::default();
    let options = EvaluationOptions {
        enable_ai_analysis: env_parse("ENABLE_AI_ANALYSIS", defaults.enable_ai_analysis)?,
        strict_mode: env_parse("STRICT_MODE", defaults.strict_mode)?,
        timeout_ms: env_parse("SANDBOX_TIMEOUT_MS", defaults.timeout_ms)?,
        memory_limit_mb: env_parse("SANDBOX_MEMORY_MB", defaults.memory_limit_mb)?,
    };
    if options.timeout_ms == 0 || options.memory_limit_mb == 0 {
        anyhow::bail!("SANDBOX_TIMEOUT_MS and SANDBOX_MEMORY_MB must be at least 1");
    }
    Ok(options)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Gauntlet API booting...");

    let languages_path =
        std::env::var("LANGUAGES_CONFIG").unwrap_or_else(|_| DEFAULT_LANGUAGES_PATH.to_string());
    let languages = LanguageRegistry::load(&languages_path)
        .with_context(|| format!("Failed to load language configurations from {}", languages_path))?;
    info!("Accepting submissions for: {:?}", languages.names());

    let evaluation = evaluation_options_from_env()?;
    info!(
        timeout_ms = evaluation.timeout_ms,
        memory_limit_mb = evaluation.memory_limit_mb,
        strict_mode = evaluation.strict_mode,
        "Evaluation settings"
    );

    // Connect to Redis
    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let client = redis::Client::open(redis_url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    info!("Connected to Redis: {}", redis_url);

    let state = Arc::new(AppState {
        storage: Arc::new(RedisStorage::new(redis_conn.clone())),
        queue: Arc::new(RedisQueue::new(redis_conn)),
        languages,
        validation: ValidationOptions::default(),
        evaluation,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let addr = std::env::var("API_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
