//! dockward
//!
//! Authenticated remote control over the local container runtime: proxies
//! the runtime API, fans out its event feed, and keeps itself up to date
//! from a git remote.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use dockward_server::{
    api,
    config::Config,
    db::Database,
    hub::EventHub,
    runtime::DockerClient,
    state::AppState,
    update::{
        restart_process, ChannelRestarter, GitWorkingCopy, RestartRequest, UpdateController,
        UpdateStatus,
    },
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to DOCKWARD_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dockward");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if let Err(e) = db.run_migrations().await {
        error!(error = %e, "Failed to run migrations");
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Event hub over the runtime's event feed
    let docker = DockerClient::new(&config.runtime.socket_path);
    if !docker.socket_exists() {
        warn!(
            socket = %config.runtime.socket_path.display(),
            "Runtime socket not found; event feed will keep retrying"
        );
    }
    let hub = EventHub::new(Arc::new(docker), config.hub.clone());
    let hub_handle = hub.handle();
    let hub_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            hub.run(shutdown_rx).await;
        }
    });

    // Self-update controller
    let working_copy = GitWorkingCopy::new(&config.update);
    let (restarter, mut restart_rx) = ChannelRestarter::new();
    let (updates, update_task) = if config.update.is_active() {
        let controller = UpdateController::new(
            Arc::new(working_copy.clone()),
            Arc::new(restarter),
            config.update.interval,
        );
        let status = controller.status();
        let task = tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move {
                controller.run(shutdown_rx).await;
            }
        });
        (status, Some(task))
    } else {
        info!("Self-update disabled");
        drop(restarter);
        (UpdateStatus::disabled(), None)
    };

    let pool = db.pool().clone();
    let state = AppState::new(
        db,
        config.admin.clone(),
        hub_handle,
        config.runtime.clone(),
        updates,
        working_copy,
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    let mut server_done = false;
    let restart: Option<RestartRequest> = tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            None
        }
        Some(request) = restart_rx.recv() => {
            info!(revision = %request.revision, "Restarting onto new revision");
            Some(request)
        }
        result = &mut server_handle => {
            server_done = true;
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            None
        }
    };

    // Signal shutdown to the server and workers, then wait a bounded time
    let _ = shutdown_tx.send(true);
    info!(
        timeout_secs = config.update.drain_timeout.as_secs(),
        "Draining in-flight work"
    );

    let drain = async {
        if !server_done {
            if let Err(e) = server_handle.await {
                warn!(error = %e, "Server task failed during drain");
            }
        }
        if let Err(e) = hub_task.await {
            warn!(error = %e, "Event hub task failed during drain");
        }
        if let Some(task) = update_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Update controller task failed during drain");
            }
        }
    };
    if tokio::time::timeout(config.update.drain_timeout, drain)
        .await
        .is_err()
    {
        warn!("Drain did not finish in time, continuing");
    }

    pool.close().await;

    if restart.is_some() {
        let never: std::io::Result<Infallible> = restart_process(config.update.restart_mode);
        if let Err(e) = never {
            error!(error = %e, "Failed to restart");
            return Err(e.into());
        }
    }

    info!("dockward shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
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
