use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::{gateway, worker, Announcer, ControlServer, Directory, MasterConfig, WorkerConfig};

pub async fn run_master(config: MasterConfig) -> Result<()> {
    info!("Starting file-proxy master");

    // Bind everything up front; failing here is fatal.
    let control_listener = TcpListener::bind(&config.server.tcp_address)
        .await
        .with_context(|| format!("Failed to bind control address {}", config.server.tcp_address))?;
    let http_listener = TcpListener::bind(&config.server.http_address)
        .await
        .with_context(|| format!("Failed to bind HTTP address {}", config.server.http_address))?;

    let directory = Directory::new();
    let control_server = ControlServer::new(directory.clone(), config.control_options());

    let control_handle = tokio::spawn(async move {
        control_server.serve(control_listener).await;
    });

    info!("Gateway listening on {}", config.server.http_address);
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, gateway::router(directory)).await {
            error!("Gateway server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = control_handle => {
            error!("Control server terminated unexpectedly");
        }
        _ = http_handle => {
            error!("Gateway server terminated unexpectedly");
        }
    }

    info!("file-proxy master stopped");
    Ok(())
}

pub async fn run_worker(config: WorkerConfig) -> Result<()> {
    info!(
        "Starting file-proxy worker {} with {} static files",
        config.server.hostname,
        config.file_paths.len()
    );

    let http_listener = TcpListener::bind(&config.server.http_address)
        .await
        .with_context(|| format!("Failed to bind HTTP address {}", config.server.http_address))?;

    let mut announcer = Announcer::spawn(config.announce_config());

    info!("File server listening on {}", config.server.http_address);
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, worker::files::router()).await {
            error!("File server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = announcer.stopped() => {
            error!("Announcer terminated unexpectedly");
        }
        _ = http_handle => {
            error!("File server terminated unexpectedly");
        }
    }

    info!("file-proxy worker stopped");
    Ok(())
}
