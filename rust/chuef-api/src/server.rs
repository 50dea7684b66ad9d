//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::captcha::{CaptchaVerifier, RecaptchaVerifier};
use crate::config::{AppConfig, ConfigValidator};
use crate::database::{InputStore, MemoryStore, ProfileStore};
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::gateway::{self, FixedWindowLimiter, RateLimitBackend, RedisWindowLimiter};
use crate::logging::OpTimer;
use crate::{AppState, Dependencies, log_banner, log_init_step, log_init_warning, log_success};

/// Chuef API version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🚀 Chuef API v{}", VERSION),
        format!(
            "Store: {} | Rate limits: {}",
            if config.database.url.is_some() { "postgres" } else { "memory" },
            if config.redis.url.is_some() { "redis" } else { "local" }
        )
    );

    for warning in ConfigValidator::warnings(&config) {
        log_init_warning!("{}", warning);
    }

    // [1/6] Store
    let step_timer = OpTimer::new("server", "store");
    let (inputs, profiles) = init_store(&config).await?;
    step_timer.finish();

    // [2/6] Redis and the per-kind limiter
    let step_timer = OpTimer::new("server", "redis");
    let redis = if let Some(ref redis_url) = config.redis.url {
        match init_redis(redis_url).await {
            Ok(conn) => {
                log_init_step!(2, 6, "Redis", format!("💾 Connected to {}", redis_url));
                Some(conn)
            }
            Err(e) => {
                log_init_warning!(
                    "Failed to connect to Redis: {}. Using in-memory rate limits.",
                    e
                );
                log_init_step!(2, 6, "Redis", "💾 In-memory fallback");
                None
            }
        }
    } else {
        log_init_step!(2, 6, "Redis", "💾 Not configured (in-memory rate limits)");
        None
    };
    let cleanup = config.rate_limits.cleanup_probability;
    let limiter: Arc<dyn RateLimitBackend> = match redis.clone() {
        Some(conn) => Arc::new(RedisWindowLimiter::new(conn, cleanup)),
        None => Arc::new(FixedWindowLimiter::new(cleanup)),
    };
    step_timer.finish();

    // [3/6] Embeddings
    let step_timer = OpTimer::new("server", "embedder");
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(&config.embeddings)?);
    log_init_step!(
        3,
        6,
        "Embeddings",
        format!(
            "🧮 {} ({} dims) {}",
            config.embeddings.model,
            config.embeddings.dimensions,
            if config.embeddings.api_key.is_some() { "✓" } else { "✗ No API key" }
        )
    );
    step_timer.finish();

    // [4/6] Captcha
    let step_timer = OpTimer::new("server", "captcha");
    let captcha: Arc<dyn CaptchaVerifier> = Arc::new(RecaptchaVerifier::new(&config.captcha)?);
    log_init_step!(
        4,
        6,
        "Captcha",
        format!(
            "🛡️  min score {} {}",
            config.captcha.min_score,
            if config.captcha.secret_key.is_some() { "✓" } else { "✗ No secret" }
        )
    );
    step_timer.finish();

    // [5/6] Sessions
    let step_timer = OpTimer::new("server", "sessions");
    let state = AppState::new(
        config,
        Dependencies {
            inputs,
            profiles,
            limiter,
            captcha,
            embedder,
            redis,
        },
    );
    log_init_step!(
        5,
        6,
        "Sessions",
        if state.sessions.is_configured() {
            "🔐 JWT verification ready"
        } else {
            "🔐 No JWT secret (all requests anonymous)"
        }
    );
    step_timer.finish();

    // [6/6] Router
    let step_timer = OpTimer::new("server", "router");
    let app = router(state);
    log_init_step!(6, 6, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("Chuef API server created successfully");
    tracing::info!("");

    Ok(app)
}

/// Build the router with middleware around an assembled state.
pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_secs);

    api::create_router()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth::session_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::rate_limit::global_throttle_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Pick the store: PostgreSQL when a URL is configured, memory otherwise.
async fn init_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn InputStore>, Arc<dyn ProfileStore>)> {
    #[cfg(feature = "database")]
    if config.database.url.is_some() {
        let store = Arc::new(crate::database::PgStore::connect(&config.database).await?);
        log_init_step!(1, 6, "Store", "🗄️  PostgreSQL + pgvector");
        return Ok((Arc::clone(&store) as Arc<dyn InputStore>, store));
    }

    #[cfg(not(feature = "database"))]
    if config.database.url.is_some() {
        log_init_warning!("DATABASE_URL is set but the database feature is disabled.");
    }

    let store = Arc::new(MemoryStore::new().with_chat_cooldown(config.ingest.memory_cooldown()));
    log_init_step!(1, 6, "Store", "🗄️  In-memory (data is lost on restart)");
    Ok((Arc::clone(&store) as Arc<dyn InputStore>, store))
}

/// Initialize Redis connection.
async fn init_redis(url: &str) -> anyhow::Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url)?;
    let conn = redis::aio::ConnectionManager::new(client).await?;
    Ok(conn)
}
