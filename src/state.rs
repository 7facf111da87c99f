//! Application state module
//!
//! The shared state handed to everything that runs beside the world.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::game::event::EventBus;
use crate::game::persistence::SaveDispatcher;
use crate::game::world::{GameWorld, WorldSettings};
use crate::net::session::SessionManager;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Sessions for connected clients
    pub session_manager: SessionManager,
    /// Game world
    pub world: Arc<GameWorld>,
    /// Game event bus
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create the application state
    ///
    /// Saves go through `saves`; its worker must be running for them to
    /// reach storage.
    pub fn new(
        config: ServerConfig,
        shutdown_tx: broadcast::Sender<()>,
        saves: SaveDispatcher,
    ) -> Self {
        let events = Arc::new(EventBus::new(config.event_channel_capacity));
        let world = Arc::new(GameWorld::new(
            WorldSettings::from_config(&config),
            events.clone(),
            saves,
        ));
        info!(
            world_id = config.world_id,
            members = config.members_world,
            "Application state created"
        );

        Self {
            config,
            session_manager: SessionManager::new(),
            world,
            events,
            shutdown_tx,
        }
    }

    /// Signal every task to shut down
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
