//! Configuration validation for Chuef API.
//!
//! Runs once at startup and reports every invalid value at the same time,
//! so a misconfigured deployment fails with one actionable message.

use super::error::{ConfigResult, ConfigurationError};
use super::{AppConfig, RateLimitConfig};

/// Configuration validator.
///
/// | Section       | Rule                                              |
/// |---------------|---------------------------------------------------|
/// | server        | port, timeout and throttle are non-zero           |
/// | rate_limits   | every window and max are non-zero, p in [0, 1]    |
/// | ingest        | character limits and history limit are non-zero   |
/// | captcha       | `min_score` in [0, 1], `verify_url` is a URL      |
/// | embeddings    | `base_url` is a URL, `dimensions` non-zero        |
/// | database      | a URL needs the `database` feature                |
///
/// Missing secrets are not errors: the affected surface rejects requests
/// and the server logs a warning at startup.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        Self::validate_server(config, &mut errors);
        Self::validate_rate_limits(config, &mut errors);
        Self::validate_ingest(config, &mut errors);
        Self::validate_captcha(config, &mut errors);
        Self::validate_embeddings(config, &mut errors);
        Self::validate_database(config, &mut errors);

        match ConfigurationError::collect(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn validate_server(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        if config.server.port == 0 {
            errors.push(ConfigurationError::invalid(
                "server.port is 0",
                "Set CHUEF__SERVER__PORT or --port to a free port (default 8080)",
            ));
        }
        if config.server.timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "server.timeout_secs is 0",
                "Set CHUEF__SERVER__TIMEOUT_SECS to a positive number of seconds",
            ));
        }
        if config.server.global_requests_per_second == 0 || config.server.global_burst == 0 {
            errors.push(ConfigurationError::invalid(
                "server.global_requests_per_second and server.global_burst must be positive",
                "Raise the global throttle instead of disabling it",
            ));
        }
    }

    fn validate_rate_limits(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        let limits = &config.rate_limits;
        for (kind, limit) in [
            ("chat_message", &limits.chat_message),
            ("contact_submission", &limits.contact_submission),
        ] {
            if let Err(e) = Self::validate_limit(kind, limit) {
                errors.push(e);
            }
        }

        if !(0.0..=1.0).contains(&limits.cleanup_probability) {
            errors.push(ConfigurationError::invalid(
                format!(
                    "rate_limits.cleanup_probability is {}",
                    limits.cleanup_probability
                ),
                "Use a probability between 0.0 and 1.0 (default 0.01)",
            ));
        }
    }

    /// Validate a single fixed-window limit.
    pub fn validate_limit(kind: &str, limit: &RateLimitConfig) -> ConfigResult<()> {
        if limit.window_ms == 0 || limit.max_requests == 0 {
            let upper = kind.to_uppercase();
            return Err(ConfigurationError::invalid(
                format!(
                    "rate_limits.{kind} has window_ms={} max_requests={}",
                    limit.window_ms, limit.max_requests
                ),
                format!(
                    "Set CHUEF__RATE_LIMITS__{upper}__WINDOW_MS and \
                    CHUEF__RATE_LIMITS__{upper}__MAX_REQUESTS to positive values"
                ),
            ));
        }
        Ok(())
    }

    fn validate_ingest(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        let ingest = &config.ingest;
        if ingest.chat_max_chars == 0 || ingest.contact_max_chars == 0 {
            errors.push(ConfigurationError::invalid(
                "ingest character limits must be positive",
                "Set CHUEF__INGEST__CHAT_MAX_CHARS and CHUEF__INGEST__CONTACT_MAX_CHARS",
            ));
        }
        if ingest.default_room.trim().is_empty() {
            errors.push(ConfigurationError::invalid(
                "ingest.default_room is empty",
                "Set CHUEF__INGEST__DEFAULT_ROOM (default \"lobby\")",
            ));
        }
        if ingest.history_limit == 0 {
            errors.push(ConfigurationError::invalid(
                "ingest.history_limit is 0",
                "Set CHUEF__INGEST__HISTORY_LIMIT to a positive number (default 100)",
            ));
        }
    }

    fn validate_captcha(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        let captcha = &config.captcha;
        if !(0.0..=1.0).contains(&captcha.min_score) {
            errors.push(ConfigurationError::invalid(
                format!("captcha.min_score is {}", captcha.min_score),
                "Use a score threshold between 0.0 and 1.0 (default 0.5)",
            ));
        }
        if url::Url::parse(&captcha.verify_url).is_err() {
            errors.push(ConfigurationError::invalid(
                format!("captcha.verify_url '{}' is not a URL", captcha.verify_url),
                "Set CHUEF__CAPTCHA__VERIFY_URL to an absolute https URL",
            ));
        }
    }

    fn validate_embeddings(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        let embeddings = &config.embeddings;
        if url::Url::parse(&embeddings.base_url).is_err() {
            errors.push(ConfigurationError::invalid(
                format!("embeddings.base_url '{}' is not a URL", embeddings.base_url),
                "Set CHUEF__EMBEDDINGS__BASE_URL, e.g. https://api.openai.com",
            ));
        }
        if embeddings.dimensions == 0 {
            errors.push(ConfigurationError::invalid(
                "embeddings.dimensions is 0",
                "Match the vector column of the inputs table (default 1536)",
            ));
        }
    }

    fn validate_database(config: &AppConfig, errors: &mut Vec<ConfigurationError>) {
        if config.database.url.is_some() && !cfg!(feature = "database") {
            errors.push(ConfigurationError::feature_unavailable(
                "PostgreSQL store",
                "The 'database' feature is not enabled in this build",
                "Rebuild with --features database, or unset DATABASE_URL to use the in-memory store",
            ));
        }
        if config.database.max_connections < config.database.min_connections {
            errors.push(ConfigurationError::invalid(
                format!(
                    "database.max_connections ({}) is below database.min_connections ({})",
                    config.database.max_connections, config.database.min_connections
                ),
                "Raise CHUEF__DATABASE__MAX_CONNECTIONS",
            ));
        }
    }

    /// Settings that are not errors but disable a surface. Logged at startup.
    #[must_use]
    pub fn warnings(config: &AppConfig) -> Vec<ConfigurationError> {
        let mut warnings = Vec::new();
        if config.auth.jwt_secret.is_none() {
            warnings.push(ConfigurationError::missing_required(
                "auth.jwt_secret",
                "Verifying sessions (chat messages and profile endpoints)",
                "SUPABASE_JWT_SECRET",
            ));
        }
        if config.embeddings.api_key.is_none() {
            warnings.push(ConfigurationError::missing_required(
                "embeddings.api_key",
                "Embedding every ingested input",
                "OPENAI_API_KEY",
            ));
        }
        if config.captcha.secret_key.is_none() {
            warnings.push(ConfigurationError::missing_required(
                "captcha.secret_key",
                "Verifying contact form captchas",
                "RECAPTCHA_SECRET_KEY",
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = AppConfig::default();
        config.rate_limits.contact_submission.max_requests = 0;

        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("contact_submission"));
        assert!(err.to_string().contains("CONTACT_SUBMISSION"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let mut config = AppConfig::default();
        config.captcha.min_score = 1.5;
        config.embeddings.base_url = "not a url".to_string();
        config.rate_limits.cleanup_probability = -0.1;

        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(err.count(), 3);
        let msg = err.to_string();
        assert!(msg.contains("min_score"));
        assert!(msg.contains("base_url"));
        assert!(msg.contains("cleanup_probability"));
    }

    #[test]
    fn test_missing_secrets_are_warnings() {
        let config = AppConfig::default();
        assert!(ConfigValidator::validate(&config).is_ok());

        let warnings = ConfigValidator::warnings(&config);
        assert_eq!(warnings.len(), 3);

        let mut configured = AppConfig::default();
        configured.auth.jwt_secret = Some("secret".into());
        configured.embeddings.api_key = Some("sk-x".into());
        configured.captcha.secret_key = Some("captcha".into());
        assert!(ConfigValidator::warnings(&configured).is_empty());
    }
}
