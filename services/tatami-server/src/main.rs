//! Tatami Control-Plane Server
//!
//! Runs the real-time match control plane: WebSocket endpoints for match and
//! tournament channels, the command router over PostgreSQL, Redis pub/sub
//! reconciliation across replicas, a `/health` endpoint, and a Prometheus
//! scrape listener.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, with connections from the environment
//! DATABASE_URL=postgres://… PUBSUB_URL=redis://… TOKEN_SHARED_SECRET=… \
//!     tatami-server
//!
//! # Explicit flags
//! tatami-server --port 8000 --log-format json
//! ```

mod config;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tatami_auth::{TokenVerifier, VerifierConfig};
use tatami_bus::{BusConfig, RedisBus};
use tatami_realtime::appender::EventLogAppender;
use tatami_realtime::{ws, AppState, CommandRouter, Hub};
use tatami_store::{PgMatchStore, StoreConfig};

use crate::config::ServerConfig;

/// Tatami live tournament control plane.
#[derive(Parser, Debug)]
#[command(name = "tatami-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "TATAMI_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "TATAMI_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "TATAMI_PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis pub/sub URL
    #[arg(long, env = "PUBSUB_URL")]
    pubsub_url: Option<String>,

    /// Shared secret for bearer-token verification
    #[arg(long, env = "TOKEN_SHARED_SECRET")]
    token_shared_secret: Option<String>,

    /// Expected token issuer
    #[arg(long, env = "TOKEN_ISSUER")]
    token_issuer: Option<String>,

    /// Prometheus scrape listener address
    #[arg(long, env = "METRICS_BIND_ADDR")]
    metrics_bind_addr: Option<String>,

    /// Server ping cadence in seconds
    #[arg(long, env = "WS_PING_INTERVAL_SECONDS")]
    ws_ping_interval_seconds: Option<u64>,

    /// Idle eviction threshold in seconds
    #[arg(long, env = "WS_IDLE_TIMEOUT_SECONDS")]
    ws_idle_timeout_seconds: Option<u64>,

    /// Per-connection outbound queue capacity
    #[arg(long, env = "WS_SEND_QUEUE_SIZE")]
    ws_send_queue_size: Option<usize>,

    /// Socket write deadline in milliseconds
    #[arg(long, env = "WS_SEND_TIMEOUT_MS")]
    ws_send_timeout_ms: Option<u64>,

    /// Optimistic-concurrency retry budget
    #[arg(long, env = "COMMAND_RETRY_MAX")]
    command_retry_max: Option<u32>,

    /// Default match duration in seconds
    #[arg(long, env = "MATCH_DEFAULT_DURATION_SECONDS")]
    match_default_duration_seconds: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TATAMI_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json, pretty)
    #[arg(long, env = "TATAMI_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.database_url {
            config.database.url = url;
        }
        if let Some(url) = self.pubsub_url {
            config.pubsub.url = url;
        }
        if let Some(secret) = self.token_shared_secret {
            config.auth.token_shared_secret = secret;
        }
        if let Some(issuer) = self.token_issuer {
            config.auth.token_issuer = Some(issuer);
        }
        if let Some(addr) = self.metrics_bind_addr {
            config.metrics.bind_addr = addr;
        }
        if let Some(v) = self.ws_ping_interval_seconds {
            config.realtime.ping_interval_seconds = v;
        }
        if let Some(v) = self.ws_idle_timeout_seconds {
            config.realtime.idle_timeout_seconds = v;
        }
        if let Some(v) = self.ws_send_queue_size {
            config.realtime.send_queue_size = v;
        }
        if let Some(v) = self.ws_send_timeout_ms {
            config.realtime.send_timeout_ms = v;
        }
        if let Some(v) = self.command_retry_max {
            config.realtime.command_retry_max = v;
        }
        if let Some(v) = self.match_default_duration_seconds {
            config.realtime.default_match_duration_seconds = v;
        }
        config.logging.level = self.log_level;
        config.logging.format = self.log_format;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting tatami control plane"
    );

    validate_config(&server_config)?;

    if server_config.metrics.enabled {
        start_metrics_exporter(&server_config)?;
    }
    tatami_realtime::metrics::describe();

    // Store.
    let store_config = StoreConfig {
        database_url: server_config.database.url.clone(),
        max_connections: server_config.database.max_connections,
        min_connections: server_config.database.min_connections,
        acquire_timeout_secs: 10,
    };
    let store = PgMatchStore::connect(&store_config).await?;
    if server_config.database.run_migrations {
        store.migrate().await?;
    }
    let store = Arc::new(store);

    // Bus.
    let bus = Arc::new(RedisBus::connect(&BusConfig::new(&server_config.pubsub.url)).await?);

    // Verifier.
    let verifier = Arc::new(TokenVerifier::new(&VerifierConfig {
        shared_secret: server_config.auth.token_shared_secret.clone(),
        issuer: server_config.auth.token_issuer.clone(),
    }));

    // Control plane.
    let realtime = server_config.realtime.clone();
    let appender = EventLogAppender::new(
        store.clone(),
        realtime.command_retry_max,
        realtime.store_deadline(),
    );
    let router = Arc::new(CommandRouter::new(appender, bus.clone()));
    let hub = Hub::new(realtime.clone(), bus.clone(), store.clone(), router);
    hub.spawn_heartbeat();

    let state = AppState::new(hub, verifier, store, bus, realtime);

    let app = axum::Router::new()
        .route("/health", axum::routing::get(http::health))
        .nest("/api/v1", ws::routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let addr = server_config.server.socket_addr()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(server_config.server.shutdown_timeout()))
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => subscriber.with(fmt::layer().json().with_target(true)).init(),
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .init(),
    }
    Ok(())
}

fn validate_config(config: &ServerConfig) -> anyhow::Result<()> {
    if config.auth.token_shared_secret == "change-me-in-production" {
        anyhow::bail!(
            "TOKEN_SHARED_SECRET must be set; refusing to verify tokens with the placeholder secret"
        );
    }
    if config.realtime.send_queue_size == 0 {
        anyhow::bail!("WS_SEND_QUEUE_SIZE must be at least 1");
    }
    Ok(())
}

fn start_metrics_exporter(config: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.metrics.bind_addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}

async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }

    tracing::info!(
        timeout_secs = timeout.as_secs(),
        "draining in-flight requests"
    );
    tokio::time::sleep(timeout).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_spec_env_names() {
        let args = Args::parse_from([
            "tatami-server",
            "--port",
            "8000",
            "--ws-ping-interval-seconds",
            "10",
        ]);
        assert_eq!(args.port, Some(8000));
        assert_eq!(args.ws_ping_interval_seconds, Some(10));
    }

    #[test]
    fn args_override_config() {
        let args = Args::parse_from([
            "tatami-server",
            "--token-shared-secret",
            "s3cret",
            "--command-retry-max",
            "5",
        ]);
        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.auth.token_shared_secret, "s3cret");
        assert_eq!(config.realtime.command_retry_max, 5);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn placeholder_secret_is_refused() {
        let config = ServerConfig::default();
        assert!(validate_config(&config).is_err());
    }
}
