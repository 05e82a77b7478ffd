use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratelimit_gateway::config::{GatewayConfig, LogFormat, LoggingConfig};
use ratelimit_gateway::gate::FailurePolicy;
use ratelimit_gateway::http::{GatewayState, HttpServer};

/// HTTP admission gateway with Redis-backed rate limiting.
#[derive(Parser, Debug)]
#[command(name = "ratelimit-gateway", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (keeps the configured host)
    #[arg(short, long)]
    port: Option<u16>,

    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Behavior when Redis is unavailable: fail_closed, fail_open or fallback
    #[arg(long)]
    failure_policy: Option<FailurePolicy>,

    /// Log filter directive, e.g. `debug` or `ratelimit_gateway=trace`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.http_addr.set_port(port);
    }
    if let Some(url) = args.redis_url {
        config.redis.url = url;
    }
    if let Some(policy) = args.failure_policy {
        config.rate_limiting.failure_policy = policy;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Ratelimit Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match args.config.as_deref() {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file given, using defaults and environment"),
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let state = Arc::new(GatewayState::from_config(&config)?);

    // Drop expired local windows and idle store keys once per window length
    let sweep_state = state.clone();
    let sweep_every = config.rate_limiting.local_window();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            sweep_state.gate.limiter().purge_expired(Instant::now());
            sweep_state
                .gate
                .dependency()
                .purge_expired(chrono::Utc::now().timestamp_millis());
        }
    });

    let server = HttpServer::new(config.server.http_addr, state);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Ratelimit Gateway stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
