//! Rustscape Entity Synchronization Library
//!
//! Per-tick player and NPC synchronization for 317 revision clients: dirty
//! flag tracking, update block encoding, a shared block cache, observer
//! update frames and the login/logout lifecycle that feeds them.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `game` - World, mobs, synchronization, lifecycle and persistence
//! - `net` - Packet buffers, byte transforms and sessions
//! - `protocol` - Outgoing messages

pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{Result, RustscapeError};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server revision (must match client)
pub const REVISION: u32 = 317;
