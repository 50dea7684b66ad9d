//! Chuef API - universal ingest backend
//!
//! A small web backend for a public chatroom, a contact form and an
//! OAuth-backed user dashboard. Every piece of user text goes through one
//! ingest endpoint that stores the raw text, its embedding, and a
//! kind-specific row:
//!
//! - **Ingest**: kind dispatch, per-kind validation, two-phase write with a
//!   compensating delete
//! - **Gateway**: session verification, fixed-window and global rate limits
//! - **Realtime**: in-process fan-out of chat messages over SSE
//! - **Profiles**: one-time usernames and display names
//!
//! # Architecture
//!
//! - [`config`]: Configuration loading and validation
//! - [`gateway`]: Sessions and rate limiting
//! - [`ingest`]: The ingest pipeline and its handlers
//! - [`database`]: Store traits with PostgreSQL and in-memory backends
//! - [`embedding`]: Embedding provider client
//! - [`captcha`]: Captcha verification
//! - [`realtime`]: Chat broadcast hub and timeline reconciliation
//! - [`api`]: HTTP API endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use chuef_api::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod captcha;
pub mod config;
pub mod database;
pub mod embedding;
pub mod gateway;
pub mod ingest;
pub mod logging;
pub mod realtime;
pub mod server;

use std::sync::Arc;

use captcha::CaptchaVerifier;
use config::AppConfig;
use database::{InputStore, ProfileStore};
use embedding::Embedder;
use gateway::rate_limit::{GlobalThrottle, global_throttle};
use gateway::{RateLimitBackend, SessionVerifier};
use ingest::{IngestPipeline, PipelineParts};
use realtime::ChatHub;

/// External collaborators the application is assembled from.
pub struct Dependencies {
    pub inputs: Arc<dyn InputStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub limiter: Arc<dyn RateLimitBackend>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub embedder: Arc<dyn Embedder>,
    pub redis: Option<redis::aio::ConnectionManager>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("limiter", &self.limiter.backend_name())
            .field("embedding_model", &self.embedder.model())
            .field("redis", &self.redis.is_some())
            .finish_non_exhaustive()
    }
}

impl Dependencies {
    /// Everything in process memory, with the given captcha and embedder.
    /// The store enforces the configured chat cooldown.
    #[must_use]
    pub fn in_memory(
        config: &AppConfig,
        captcha: Arc<dyn CaptchaVerifier>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let cooldown = config.ingest.memory_cooldown();
        let store = Arc::new(database::MemoryStore::new().with_chat_cooldown(cooldown));
        Self {
            inputs: Arc::clone(&store) as Arc<dyn InputStore>,
            profiles: store,
            limiter: Arc::new(gateway::FixedWindowLimiter::new(
                config.rate_limits.cleanup_probability,
            )),
            captcha,
            embedder,
            redis: None,
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Ingest pipeline behind `POST /api/ingest`.
    pub pipeline: Arc<IngestPipeline>,
    /// Ledger store, also read for chat history and readiness.
    pub inputs: Arc<dyn InputStore>,
    /// Profiles and display names.
    pub profiles: Arc<dyn ProfileStore>,
    /// Realtime chat fan-out.
    pub hub: ChatHub,
    /// Process-wide request throttle.
    pub throttle: Arc<GlobalThrottle>,
    /// Session token verifier.
    pub sessions: Arc<SessionVerifier>,
    /// Redis connection, when rate limits are shared.
    pub redis: Option<redis::aio::ConnectionManager>,
}

impl AppState {
    /// Assemble the state from configuration and collaborators.
    #[must_use]
    pub fn new(config: AppConfig, deps: Dependencies) -> Self {
        let hub = ChatHub::new(config.realtime.channel_capacity);
        let pipeline = IngestPipeline::new(
            PipelineParts {
                limiter: deps.limiter,
                captcha: deps.captcha,
                embedder: deps.embedder,
                inputs: Arc::clone(&deps.inputs),
                profiles: Arc::clone(&deps.profiles),
                hub: hub.clone(),
            },
            config.rate_limits.clone(),
            config.ingest.clone(),
        );

        Self {
            throttle: global_throttle(
                config.server.global_requests_per_second,
                config.server.global_burst,
            ),
            sessions: Arc::new(SessionVerifier::new(&config.auth)),
            pipeline: Arc::new(pipeline),
            inputs: deps.inputs,
            profiles: deps.profiles,
            hub,
            redis: deps.redis,
            config: Arc::new(config),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("pipeline", &self.pipeline)
            .field("sessions", &self.sessions)
            .field("subscribers", &self.hub.subscriber_count())
            .field("redis", &self.redis.is_some())
            .finish_non_exhaustive()
    }
}
