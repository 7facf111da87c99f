//! Error handling module
//!
//! Defines custom error types for the Rustscape sync server.

use std::io;

use thiserror::Error;

use crate::net::session::SessionState;

/// Main error type for the Rustscape sync server
#[derive(Error, Debug)]
pub enum RustscapeError {
    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Game logic errors
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Value {value} does not fit in {bits} bits")]
    BitOverflow { value: u32, bits: usize },

    #[error("Malformed update payload: {0}")]
    MalformedPayload(String),

    #[error("Outbound channel closed for session {0}")]
    ChannelClosed(u64),

    #[error("Outbound channel full for session {0}")]
    ChannelFull(u64),
}

/// Game logic errors
#[derive(Error, Debug)]
pub enum GameError {
    #[error("Player not found: {0}")]
    PlayerNotFound(u16),

    #[error("NPC not found: {0}")]
    NpcNotFound(u16),

    #[error("Invalid lifecycle state: expected {expected}, found {actual}")]
    InvalidLifecycleState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Illegal lifecycle transition: {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    #[error("Session already bound to player {0}")]
    SessionAlreadyBound(u16),

    #[error("No session bound to player {0}")]
    SessionNotBound(u16),

    #[error("Update flag {flag} set without payload on mob {index}")]
    MissingUpdatePayload { flag: &'static str, index: u16 },

    #[error("Player already registered: {0}")]
    AlreadyRegistered(String),

    #[error("World full")]
    WorldFull,

    #[error("Stale update block handle")]
    StaleBlock,

    #[error("NPC {index} shows id {id}, outside the 12-bit wire range")]
    InvalidNpcId { index: u16, id: u16 },
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Save queue closed")]
    QueueClosed,

    #[error("Invalid player name for storage: {0}")]
    InvalidName(String),

    #[error("Player file not found: {0}")]
    NotFound(String),
}

/// Result type alias for Rustscape operations
pub type Result<T> = std::result::Result<T, RustscapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GameError::InvalidLifecycleState {
            expected: SessionState::LoginQueue,
            actual: SessionState::LoggedIn,
        };
        assert_eq!(
            err.to_string(),
            "Invalid lifecycle state: expected LoginQueue, found LoggedIn"
        );

        let err = GameError::MissingUpdatePayload {
            flag: "SECONDARY_HIT",
            index: 7,
        };
        assert_eq!(
            err.to_string(),
            "Update flag SECONDARY_HIT set without payload on mob 7"
        );

        let err = ProtocolError::PacketTooLarge { size: 70000, max: 65535 };
        assert_eq!(err.to_string(), "Packet too large: 70000 bytes (max: 65535)");
    }

    #[test]
    fn test_error_conversion() {
        let err: RustscapeError = GameError::WorldFull.into();
        assert!(matches!(err, RustscapeError::Game(GameError::WorldFull)));
        assert_eq!(err.to_string(), "Game error: World full");
    }
}
