mod bootstrap;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use steward_core::config::{AppConfig, LoadOptions, LogFormat};
use steward_db::SqlUsageEventSink;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::routes::{api_router, AppState};

const USAGE_DRAIN_INTERVAL: Duration = Duration::from_secs(30);
const USAGE_DRAIN_BATCH: u32 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config);

    let app = bootstrap::build(&config).await?;
    tokio::spawn(drain_usage_outbox(app.usage_outbox));
    let state = AppState { router: app.router, ledger: app.ledger, pool: app.pool };

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address `{}:{}`",
                config.server.bind_address, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!(event_name = "server.listening", %addr, "accepting connections");

    axum::serve(listener, api_router(state))
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_secs))
        .await
        .context("server terminated abnormally")?;
    info!(event_name = "server.stopped", "shutdown complete");
    Ok(())
}

/// Periodically forwards queued usage events out of the outbox so the
/// turn path never waits on the billing export.
async fn drain_usage_outbox(outbox: SqlUsageEventSink) {
    let mut ticker = tokio::time::interval(USAGE_DRAIN_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(error) = outbox.drain_once(USAGE_DRAIN_BATCH).await {
            warn!(
                event_name = "usage.drain_failed",
                error = %error,
                "usage outbox drain pass failed, will retry"
            );
        }
    }
}

/// Optional config path comes from the first CLI argument or the
/// `STEWARD_CONFIG` environment variable; absent both, defaults plus
/// `steward.toml` in the working directory apply.
fn load_config() -> anyhow::Result<AppConfig> {
    let explicit = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STEWARD_CONFIG").ok())
        .map(PathBuf::from);
    let require_file = explicit.is_some();
    AppConfig::load(LoadOptions {
        config_path: explicit,
        require_file,
        overrides: Default::default(),
    })
    .context("could not load configuration")
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolves on SIGINT or SIGTERM. A watchdog bounds the drain: if
/// in-flight requests outlive the grace period, the process exits
/// anyway.
async fn shutdown_signal(grace_secs: u64) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // If the signal handler cannot be installed, run until killed.
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(
        event_name = "server.shutdown_requested",
        grace_secs,
        "draining in-flight requests"
    );
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(grace_secs.max(1))).await;
        tracing::warn!(event_name = "server.drain_timeout", "grace period elapsed, exiting");
        std::process::exit(0);
    });
}
