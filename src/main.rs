//! Rota Relay - Entry Point
//!
//! Loads configuration, starts the relay and waits for a shutdown signal.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rota_relay::config::{Config, LogConfig, LogFormat};
use rota_relay::error;
use rota_relay::proxy::{ProxyHandler, ProxyRotation, ProxyServer};

#[tokio::main]
async fn main() -> error::Result<()> {
    let config = Config::load()?;

    init_tracing(&config.log);

    info!("Starting Rota Relay");

    let target = Arc::new(config.target.clone());
    let triggers = Arc::new(config.triggers.clone());
    let rotation = Arc::new(ProxyRotation::new(config.proxies.clone())?);

    for entry in triggers.unmatchable() {
        warn!(entry, "Trigger code is not a decimal status code and will never match");
    }

    info!("Proxying to {}", target);
    info!(
        proxies = rotation.len(),
        triggers = %triggers,
        "Using {} as the first proxy",
        rotation.current()
    );

    let handler = Arc::new(ProxyHandler::new(
        target,
        rotation,
        triggers,
        config.handler.clone(),
    )?);
    let proxy_server = ProxyServer::new(handler);
    let listener = ProxyServer::bind(&config.listen_addr).await?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(listener, shutdown_rx).await {
            error!("Proxy server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = proxy_task.await;

    info!("Rota Relay stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_relay={}", log.level).into());

    match log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
