//! Configuration management for Chuef API.
//!
//! Configuration is layered: serde defaults, then an optional config file
//! (`config/chuef-api.{toml,yaml,json}` or an explicit path), then
//! `CHUEF__SECTION__KEY` environment variables, then the well-known
//! provider variables (`DATABASE_URL`, `OPENAI_API_KEY`, ...).
//!
//! ```rust,ignore
//! use chuef_api::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session verification.
    #[serde(default)]
    pub auth: AuthConfig,
    /// PostgreSQL connection.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Redis connection (shared rate limiting).
    #[serde(default)]
    pub redis: RedisConfig,
    /// Embedding provider.
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    /// Captcha verification.
    #[serde(default)]
    pub captcha: CaptchaConfig,
    /// Per-kind rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    /// Ingest validation limits.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Realtime fan-out.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the default locations and validate it.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `path` instead of the default config
    /// files when given, and validate it.
    pub fn load_from(path: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(path)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{}", e))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path).required(true)),
            None => builder.add_source(config::File::with_name("config/chuef-api").required(false)),
        };

        let raw = builder
            .add_source(
                config::Environment::with_prefix("CHUEF")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = raw.try_deserialize()?;
        app_config.apply_env_overrides();

        Ok(app_config)
    }

    /// Apply the provider environment variables the hosting platform sets.
    fn apply_env_overrides(&mut self) {
        if let Some(url) = first_env(&["DATABASE_URL", "POSTGRES_URL"]) {
            self.database.url = Some(url);
        }
        if let Some(url) = first_env(&["REDIS_URL"]) {
            self.redis.url = Some(url);
        }
        if let Some(key) = first_env(&["OPENAI_API_KEY"]) {
            self.embeddings.api_key = Some(key);
        }
        if let Some(secret) = first_env(&["RECAPTCHA_SECRET_KEY"]) {
            self.captcha.secret_key = Some(secret);
        }
        if let Some(secret) = first_env(&["SUPABASE_JWT_SECRET", "JWT_SECRET"]) {
            self.auth.jwt_secret = Some(secret);
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Process-wide request throttle (requests per second).
    #[serde(default = "default_global_rps")]
    pub global_requests_per_second: u32,
    /// Burst allowance for the process-wide throttle.
    #[serde(default = "default_global_burst")]
    pub global_burst: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_global_rps() -> u32 {
    1000
}

fn default_global_burst() -> u32 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            global_requests_per_second: default_global_rps(),
            global_burst: default_global_burst(),
        }
    }
}

/// Session verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret the OAuth platform signs session tokens with.
    pub jwt_secret: Option<String>,
    /// Expected `aud` claim. `None` disables audience checks.
    #[serde(default = "default_audience")]
    pub audience: Option<String>,
    /// Cookie carrying the session token when no bearer header is sent.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_audience() -> Option<String> {
    Some("authenticated".to_string())
}

fn default_cookie_name() -> String {
    "sb-access-token".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            audience: default_audience(),
            cookie_name: default_cookie_name(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Unset means the in-memory store.
    pub url: Option<String>,
    /// Maximum connection pool size.
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
    /// Minimum connection pool size.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_pool_size() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_pool_size(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL. Unset means process-local rate limiting.
    pub url: Option<String>,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key for the OpenAI-compatible embeddings endpoint.
    pub api_key: Option<String>,
    /// Base URL of the provider.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Embedding model.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected vector dimension.
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Request timeout in seconds.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_timeout() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Captcha verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Server-side secret. Never sent to clients.
    pub secret_key: Option<String>,
    /// Verification endpoint.
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    /// Minimum score accepted from score-based captchas.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Request timeout in seconds.
    #[serde(default = "default_captcha_timeout")]
    pub timeout_secs: u64,
}

fn default_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_min_score() -> f64 {
    0.5
}

fn default_captcha_timeout() -> u64 {
    10
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            verify_url: default_verify_url(),
            min_score: default_min_score(),
            timeout_secs: default_captcha_timeout(),
        }
    }
}

/// A fixed-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window.
    pub max_requests: u32,
}

impl RateLimitConfig {
    /// Window length as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limits per ingest kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// Limit for chat messages.
    #[serde(default = "default_chat_limit")]
    pub chat_message: RateLimitConfig,
    /// Limit for contact submissions.
    #[serde(default = "default_contact_limit")]
    pub contact_submission: RateLimitConfig,
    /// Probability that a check also sweeps expired in-memory entries.
    #[serde(default = "default_cleanup_probability")]
    pub cleanup_probability: f64,
}

fn default_chat_limit() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: 60_000,
        max_requests: 30,
    }
}

fn default_contact_limit() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: 60_000,
        max_requests: 5,
    }
}

fn default_cleanup_probability() -> f64 {
    0.01
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            chat_message: default_chat_limit(),
            contact_submission: default_contact_limit(),
            cleanup_probability: default_cleanup_probability(),
        }
    }
}

/// Ingest validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum chat message length in characters.
    #[serde(default = "default_chat_max_chars")]
    pub chat_max_chars: usize,
    /// Maximum contact message length in characters.
    #[serde(default = "default_contact_max_chars")]
    pub contact_max_chars: usize,
    /// Room used when a chat payload names none.
    #[serde(default = "default_room")]
    pub default_room: String,
    /// Seconds a user must wait between chat messages, as announced in
    /// `COOLDOWN` replies.
    #[serde(default = "default_chat_cooldown")]
    pub chat_cooldown_secs: u64,
    /// Whether the in-memory store enforces the cooldown itself. The
    /// database enforces it through row-level security.
    #[serde(default = "default_true")]
    pub memory_chat_cooldown: bool,
    /// Maximum messages returned by the history endpoint.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_chat_max_chars() -> usize {
    2000
}

fn default_contact_max_chars() -> usize {
    5000
}

fn default_room() -> String {
    "lobby".to_string()
}

fn default_chat_cooldown() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_history_limit() -> usize {
    100
}

impl IngestConfig {
    /// Cooldown the in-memory store should enforce. Zero disables it.
    #[must_use]
    pub fn memory_cooldown(&self) -> Duration {
        if self.memory_chat_cooldown {
            Duration::from_secs(self.chat_cooldown_secs)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chat_max_chars: default_chat_max_chars(),
            contact_max_chars: default_contact_max_chars(),
            default_room: default_room(),
            chat_cooldown_secs: default_chat_cooldown(),
            memory_chat_cooldown: true,
            history_limit: default_history_limit(),
        }
    }
}

/// Realtime fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Broadcast buffer per subscriber before it starts lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// SSE keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_keep_alive() -> u64 {
    15
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
