//! Chuef API - Main Entry Point
//!
//! Universal ingest backend for the chatroom, contact form and profile
//! surfaces.

use clap::Parser;
use mimalloc::MiMalloc;

use chuef_api::config::AppConfig;
use chuef_api::logging::init_tracing;
use chuef_api::server::create_app;

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "chuef-api")]
#[command(about = "Chuef API - universal ingest backend")]
#[command(version)]
struct Args {
    /// Host to bind to. Overrides the config file.
    #[arg(long, env = "CHUEF_API_HOST")]
    host: Option<String>,

    /// Port to listen on. Overrides the config file.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Log level. Overrides the config file.
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, env = "CHUEF_JSON_LOGS")]
    json_logs: bool,

    /// Config file path.
    #[arg(short, long, env = "CHUEF_API_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json |= args.json_logs;

    init_tracing(&config.logging.level, config.logging.json);
    tracing::info!("Starting Chuef API v{}", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;
    tracing::info!("Application initialized");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
