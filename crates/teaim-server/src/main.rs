//! TEAIM Server
//!
//! Serves the redaction and notes API behind the ingress stack, and offers
//! two helper commands: a one-shot `redact` and a `watch` poller that drives
//! the guarded fetch client against a URL.

mod app;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teaim_egress::{
    FetchError, FetchGuard, GuardedBody, HttpClientConfig, LoggingUnauthorizedHandler, PollerConfig,
    SmartPoller, TracingNotifier, create_client,
};
use teaim_ingress::RateLimiter;
use teaim_observability::{DrainFlag, Metrics, init_logging};
use teaim_pii::{PiiPolicy, RedactionMode, StandardRedactor};
use tracing::{info, warn};

use crate::app::{AppState, build_router};
use crate::config::ServerConfig;

/// TEAIM request-processing server
#[derive(Parser)]
#[command(name = "teaim-server", version)]
#[command(about = "PII redaction and rate-limited write API for TEAIM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "TEAIM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default if no command specified)
    Serve,

    /// Redact text from --text or stdin and print the outcome as JSON
    Redact {
        /// Text to scan; read from stdin when omitted
        #[arg(long)]
        text: Option<String>,

        /// strict, mask or none; defaults to the configured mode
        #[arg(long)]
        mode: Option<RedactionMode>,

        /// Email domain left untouched (repeatable)
        #[arg(long = "allow-domain", value_name = "DOMAIN")]
        allow_domains: Vec<String>,
    },

    /// Poll a URL with retries and adaptive backoff, logging each result
    Watch {
        /// URL to GET
        url: String,

        /// Base polling interval in seconds
        #[arg(long, default_value = "5")]
        interval_secs: u64,

        /// Ceiling for the backed-off interval in seconds
        #[arg(long, default_value = "60")]
        max_interval_secs: u64,
    },
}

fn load_config(cli: &Cli) -> Result<(ServerConfig, Vec<String>)> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    let warnings = config.merge_env();

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok((config, warnings))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, warnings) = load_config(&cli)?;

    init_logging(&config.logging.level, config.logging.json)
        .context("Failed to initialize logging")?;

    for warning in &warnings {
        warn!("{}", warning);
    }
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Redact {
            text,
            mode,
            allow_domains,
        }) => redact_once(&config, text, mode, allow_domains),
        Some(Commands::Watch {
            url,
            interval_secs,
            max_interval_secs,
        }) => {
            watch(
                url,
                Duration::from_secs(interval_secs),
                Duration::from_secs(max_interval_secs),
            )
            .await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting TEAIM server");

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let rate_limit = config.rate_limit_config()?;
    info!(
        "Rate limiting {:?} to {} requests per {}ms",
        rate_limit.methods, rate_limit.max, config.rate_limit.window_ms
    );

    let limiter = Arc::new(RateLimiter::new(rate_limit).with_metrics(Arc::clone(&metrics)));
    let redactor = StandardRedactor::new().context("Failed to build PII detectors")?;
    info!("PII redaction mode: {}", config.pii.mode.as_str());

    let state = AppState::new(
        Arc::new(redactor),
        config.pii_policy(),
        Arc::clone(&limiter),
        metrics,
        config.limits.max_body_bytes,
    );
    let drain = state.drain_flag();

    let sweeper = (config.rate_limit.sweep_interval_secs > 0).then(|| {
        state
            .limiter()
            .spawn_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs))
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("   Health check: http://{}/healthz", addr);
    info!("   Metrics:      http://{}/metrics", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain))
    .await
    .context("Server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    info!("Server shut down cleanly");
    Ok(())
}

fn redact_once(
    config: &ServerConfig,
    text: Option<String>,
    mode: Option<RedactionMode>,
    allow_domains: Vec<String>,
) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read text from stdin")?;
            buf
        }
    };

    let mut policy: PiiPolicy = config.pii_policy().with_allowed_domains(allow_domains);
    if let Some(mode) = mode {
        policy.mode = mode;
    }

    let outcome = teaim_pii::redact(&text, &policy);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn watch(url: String, base_interval: Duration, max_interval: Duration) -> Result<()> {
    let client = create_client(&HttpClientConfig::default())?;
    let guard = FetchGuard::new(
        client,
        Arc::new(TracingNotifier),
        Arc::new(LoggingUnauthorizedHandler),
    );

    // A terminal has no hidden state; the sender stays alive for the whole run
    let (_visible_tx, visible_rx) = tokio::sync::watch::channel(true);

    let poller_config = PollerConfig {
        base_interval,
        max_interval: max_interval.max(base_interval),
        ..Default::default()
    };

    info!(url = %url, interval_secs = base_interval.as_secs(), "Watching");

    let handle = SmartPoller::spawn(poller_config, visible_rx, move || {
        let guard = guard.clone();
        let url = url.clone();
        async move {
            let request = guard
                .client()
                .get(&url)
                .build()
                .map_err(|e| FetchError::Config(format!("invalid watch URL: {}", e)))?;
            match guard.fetch(request).await? {
                GuardedBody::Json(value) => info!(body = %value, "Poll succeeded"),
                GuardedBody::Text(text) => info!(bytes = text.len(), "Poll succeeded"),
            }
            Ok::<(), teaim_core::Error>(())
        }
    });

    shutdown_signal(DrainFlag::default()).await;
    handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal(drain: DrainFlag) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    drain.start_draining();
    info!("Shutdown signal received");
}
