/**
 * PUREVENT DAEMON - Entry point
 *
 * ROLE: load configuration, start the serial gateway loop, serve the HTTP API
 * until SIGINT/SIGTERM, then stop the loop and flush what is persisted.
 *
 * A missing gateway does not stop the process: the API keeps answering with
 * running=false so the problem is visible from the outside.
 */

use anyhow::{Context, Result};
use purevent_daemon::config::load_config;
use purevent_daemon::http::build_router;
use purevent_daemon::transport::{SerialConnector, ThreadSleeper};
use purevent_daemon::Daemon;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    let config = load_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("purevent_daemon={}", config.log_level).into()),
        )
        .init();

    info!("purevent daemon starting (port {}, {} baud)", config.serial.port, config.serial.baud_rate);
    let bind = config.http.bind.clone();

    let daemon = Arc::new(Daemon::new(config, Arc::new(SerialConnector), Arc::new(ThreadSleeper)));
    daemon.load_state();

    // opening the port and spawning the loop block, keep them off the runtime
    let starter = daemon.clone();
    tokio::task::spawn_blocking(move || starter.start())
        .await
        .context("gateway start task failed")?;

    let app = build_router(daemon.app_state());
    let listener = TcpListener::bind(&bind).await.with_context(|| format!("cannot bind {bind}"))?;
    info!("listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let stopper = daemon.clone();
    tokio::task::spawn_blocking(move || stopper.shutdown())
        .await
        .context("shutdown task failed")?;
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("cannot listen for SIGTERM: {}", e);
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
    info!("shutdown signal received");
}
