//! Rustscape Sync Server
//!
//! Runs the game tick with player and NPC synchronization for 317
//! revision clients. Transports attach sessions through [`AppState`].

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rustscape_sync::config::ServerConfig;
use rustscape_sync::game::event::GameEvent;
use rustscape_sync::game::persistence::{JsonFileStore, PersistenceWorker};
use rustscape_sync::state::AppState;
use rustscape_sync::{REVISION, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenv::dotenv();

    let config = ServerConfig::load().await?;
    init_logging(&config);

    info!(version = VERSION, revision = REVISION, "Rustscape sync server starting");
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Persistence runs on its own task; the tick only enqueues
    let store = JsonFileStore::new(config.data_path.clone());
    info!(path = %store.root().display(), "Player saves directory");
    let (saves, worker) = PersistenceWorker::new(store);
    let persistence_handle = worker.spawn();

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone(), saves));

    let mut event_rx = state.events.subscribe();
    let mut event_shutdown_rx = shutdown_tx.subscribe();
    let event_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Ok(GameEvent::Login { player_index, username }) => {
                        info!(player_index = player_index, username = %username, "Login event");
                    }
                    Ok(GameEvent::Logout { player_index, username }) => {
                        info!(player_index = player_index, username = %username, "Logout event");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = event_shutdown_rx.recv() => break,
            }
        }
    });

    let world_state = state.clone();
    let mut world_shutdown_rx = shutdown_tx.subscribe();
    let world_handle = tokio::spawn(async move {
        world_state.world.run(&mut world_shutdown_rx).await;
    });

    info!("World {} is ready", config.world_id);

    wait_for_shutdown(shutdown_tx.clone()).await;
    info!("Shutting down server...");

    let _ = world_handle.await;
    let _ = event_handle.await;

    // Dropping the last dispatcher lets the worker drain and exit
    drop(state);
    match persistence_handle.await {
        Ok(saved) => info!(saved = saved, "Persistence drained"),
        Err(e) => error!(error = %e, "Persistence worker failed"),
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(config: &ServerConfig) {
    let default_filter = if config.debug {
        "debug,rustscape_sync=trace"
    } else {
        "info,rustscape_sync=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    if config.log_json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
