//! Structured logging for Chuef API.
//!
//! Subscriber setup, an operation timer for startup phases, and a few
//! macros that keep startup output uniform.

use std::time::Instant;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. `json` switches the fmt layer to
/// newline-delimited JSON for log shippers.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        // A subscriber is already installed (tests, embedding binaries).
        tracing::debug!(error = %e, "Tracing subscriber already initialized");
    }
}

/// Measures one startup or maintenance operation and logs its duration.
///
/// ```rust,ignore
/// let timer = OpTimer::new("database", "connect");
/// let pool = connect(&url).await;
/// timer.finish_with_result(pool.as_ref().map(|_| ()));
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: String,
    operation: String,
    start: Instant,
}

impl OpTimer {
    /// Start timing `operation` of `component`.
    #[must_use]
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        let component = component.into();
        let operation = operation.into();

        tracing::debug!(component = %component, operation = %operation, "Operation started");

        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Log the elapsed time.
    pub fn finish(self) {
        tracing::info!(
            component = %self.component,
            operation = %self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }

    /// Log the elapsed time, at error level when `result` is an error.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.start.elapsed().as_millis();

        match result {
            Ok(_) => tracing::info!(
                component = %self.component,
                operation = %self.operation,
                duration_ms,
                "Operation completed successfully"
            ),
            Err(e) => tracing::error!(
                component = %self.component,
                operation = %self.operation,
                duration_ms,
                error = %e,
                "Operation failed"
            ),
        }
    }
}

/// Log a numbered startup step: `log_init_step!(2, 6, "Store", "in-memory")`.
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {} - {}",
            $step,
            $total,
            $name,
            $detail
        );
    };
}

/// Log a startup warning: `log_init_warning!("No captcha secret configured")`.
#[macro_export]
macro_rules! log_init_warning {
    ($msg:expr) => {
        tracing::warn!("⚠️  {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::warn!("⚠️  {}", format!($msg, $($arg)*));
    };
}

/// Log completion of a major phase.
#[macro_export]
macro_rules! log_success {
    ($msg:expr) => {
        tracing::info!("✅ {}", $msg);
    };
}

/// Log a startup banner with an optional subtitle.
#[macro_export]
macro_rules! log_banner {
    ($title:expr, $subtitle:expr) => {
        tracing::info!("═══════════════════════════════════════════════════");
        tracing::info!("  {}", $title);
        tracing::info!("  {}", $subtitle);
        tracing::info!("═══════════════════════════════════════════════════");
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timer_creation() {
        let timer = OpTimer::new("store", "connect");
        assert_eq!(timer.component, "store");
        assert_eq!(timer.operation, "connect");
        timer.finish();
    }

    #[test]
    fn test_op_timer_finish_with_result() {
        let ok: Result<u8, String> = Ok(1);
        OpTimer::new("store", "connect").finish_with_result(ok.as_ref());

        let err: Result<u8, String> = Err("refused".to_string());
        OpTimer::new("store", "connect").finish_with_result(err.as_ref());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("debug", false);
        init_tracing("info", true);
    }
}
