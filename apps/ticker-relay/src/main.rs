//! Ticker Relay Binary
//!
//! Starts the Binance ticker relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-relay
//! ```
//!
//! # Environment Variables
//!
//! - `BINANCE_STREAM_URL`: Binance stream endpoint (default: wss://stream.binance.com:9443/ws)
//! - `RELAY_SYMBOL`: Symbol to relay (default: BTCUSDT)
//! - `RELAY_HTTP_PORT`: HTTP port for `/ws`, health and metrics (default: 8000)
//! - `RELAY_STATIC_DIR`: Directory served at `/` (default: ./static, empty disables)
//! - `RELAY_RESTART_ENABLED`: Restart the upstream session after failures (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ticker_relay::infrastructure::binance::{RestartPolicy, SessionEnd, SessionStatus};
use ticker_relay::infrastructure::metrics;
use ticker_relay::infrastructure::telemetry;
use ticker_relay::{
    AppState, BroadcastConfig, HttpServer, Publisher, RelayConfig, SinkRegistry, UpstreamSession,
    broadcast_channel, init_metrics,
};

/// Bound on each teardown step.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("rustls crypto provider was already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let http_token = CancellationToken::new();

    let registry = Arc::new(SinkRegistry::new());
    let (publisher, engine) =
        broadcast_channel(BroadcastConfig::from(config.broadcast), Arc::clone(&registry));
    let broadcast_stats = engine.stats();
    let session_status = Arc::new(SessionStatus::new());

    let app_state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        Arc::clone(&session_status),
        broadcast_stats,
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        config.server.static_dir.clone(),
        app_state,
        http_token.clone(),
    );

    let engine_handle = tokio::spawn(engine.run());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Ticker relay ready");

    let outcome = run_sessions(&config, publisher, &session_status, &shutdown_token).await;

    // Session is gone and the last publisher dropped: the engine drains, then HTTP stops.
    shutdown_token.cancel();
    join_within("broadcast engine", engine_handle).await;
    http_token.cancel();
    join_within("HTTP server", http_handle).await;

    match &outcome {
        Ok(()) => tracing::info!("Ticker relay stopped"),
        Err(e) => tracing::error!(error = %e, "Ticker relay stopped after upstream failure"),
    }
    outcome
}

/// Run upstream sessions until cancelled, restarting per the configured policy.
async fn run_sessions(
    config: &RelayConfig,
    publisher: Publisher,
    status: &Arc<SessionStatus>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut policy = config
        .restart
        .enabled
        .then(|| RestartPolicy::new(config.restart.policy_config()));

    loop {
        let forwarded_before = status.snapshot().tickers_forwarded;
        let session = UpstreamSession::new(
            config.upstream.session_config(),
            publisher.clone(),
            shutdown.clone(),
        )
        .with_status(Arc::clone(status));

        let result = session.run().await;

        let Some(policy) = policy.as_mut() else {
            return match result {
                Ok(end) => {
                    tracing::info!(?end, "Upstream session ended");
                    Ok(())
                }
                Err(e) => Err(e).context("upstream session failed"),
            };
        };

        match result {
            Ok(SessionEnd::Cancelled) => return Ok(()),
            Ok(SessionEnd::ClosedByPeer) => tracing::warn!("Upstream closed the session"),
            Err(e) => tracing::error!(error = %e, kind = e.kind(), "Upstream session failed"),
        }

        if status.snapshot().tickers_forwarded > forwarded_before {
            policy.reset();
        }
        let delay = policy.next_delay().context("upstream restarts exhausted")?;
        metrics::record_session_restart();
        tracing::info!(
            attempt = policy.attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Restarting upstream session"
        );

        tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Await a background task, giving up after [`SHUTDOWN_TIMEOUT`].
async fn join_within(name: &'static str, handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => tracing::debug!(task = name, "Task finished"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task panicked"),
        Err(_) => tracing::warn!(task = name, "Task did not finish before shutdown timeout"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        symbol = %config.upstream.symbol,
        http_port = config.server.http_port,
        static_dir = ?config.server.static_dir,
        queue_capacity = config.broadcast.queue_capacity,
        restart = config.restart.enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = %config.upstream.url,
        pong_deadline_ms = u64::try_from(config.upstream.pong_deadline.as_millis()).unwrap_or(u64::MAX),
        "Upstream endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel the session.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
