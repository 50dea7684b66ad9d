//! Configuration error types with actionable user messages.
//!
//! Every variant says what is wrong and which setting or environment
//! variable fixes it.

use thiserror::Error;

/// Configuration errors reported by [`super::ConfigValidator`].
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A value is out of range or malformed.
    #[error("Invalid configuration: {message}\n\nHow to fix: {fix_hint}")]
    Invalid {
        /// What is wrong.
        message: String,
        /// How to fix it.
        fix_hint: String,
    },
    /// A setting needed by an enabled surface is missing.
    #[error("Missing required configuration: {setting}\n\nRequired for: {context}\nSet via: {env_var}")]
    MissingRequired {
        /// The missing setting name.
        setting: String,
        /// What needs this setting.
        context: String,
        /// Environment variable to set.
        env_var: String,
    },
    /// A configured backend is not compiled into this build.
    #[error("Feature not available: {feature}\n\nReason: {reason}\nAlternative: {alternative}")]
    FeatureUnavailable {
        /// The unavailable feature.
        feature: String,
        /// Why it's unavailable.
        reason: String,
        /// What to use instead.
        alternative: String,
    },
    /// Several problems at once.
    #[error("{}", render_multiple(.0))]
    Multiple(Vec<ConfigurationError>),
}

fn render_multiple(errors: &[ConfigurationError]) -> String {
    let mut out = String::from("Multiple configuration errors:\n");
    for (i, err) in errors.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n", i + 1, err));
    }
    out
}

impl ConfigurationError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid(message: impl Into<String>, fix_hint: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            fix_hint: fix_hint.into(),
        }
    }

    /// Create a missing required configuration error.
    #[must_use]
    pub fn missing_required(
        setting: impl Into<String>,
        context: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self::MissingRequired {
            setting: setting.into(),
            context: context.into(),
            env_var: env_var.into(),
        }
    }

    /// Create a feature unavailable error.
    #[must_use]
    pub fn feature_unavailable(
        feature: impl Into<String>,
        reason: impl Into<String>,
        alternative: impl Into<String>,
    ) -> Self {
        Self::FeatureUnavailable {
            feature: feature.into(),
            reason: reason.into(),
            alternative: alternative.into(),
        }
    }

    /// Collapse a list of errors: `None` when empty, the error itself when
    /// there is only one, [`Self::Multiple`] otherwise.
    #[must_use]
    pub fn collect(mut errors: Vec<ConfigurationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Get the number of errors (1 for single errors, N for multiple).
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;
