//! Server configuration module
//!
//! Loads the world configuration from a TOML file with environment
//! variable overrides.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::game::player::MAX_PLAYER_INDEX;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name used in log output
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// World ID (1-255)
    #[serde(default = "default_world_id")]
    pub world_id: u8,

    /// Game tick rate in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Maximum number of players
    #[serde(default = "default_max_players")]
    pub max_players: u16,

    /// Maximum number of NPCs
    #[serde(default = "default_max_npcs")]
    pub max_npcs: u16,

    /// Directory holding player saves
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Whether the world grants membership
    #[serde(default = "default_true")]
    pub members_world: bool,

    /// Buffered game events before slow listeners start lagging
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Entity synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

/// Entity synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tiles on each axis within which mobs are visible
    #[serde(default = "default_view_distance")]
    pub view_distance: u16,

    /// Cap on an observer's local player list
    #[serde(default = "default_max_local_players")]
    pub max_local_players: usize,

    /// Cap on an observer's local NPC list
    #[serde(default = "default_max_local_npcs")]
    pub max_local_npcs: usize,

    /// Initial capacity of each frame buffer
    #[serde(default = "default_frame_capacity")]
    pub frame_capacity: usize,
}

fn default_server_name() -> String {
    "Rustscape".to_string()
}

fn default_world_id() -> u8 {
    1
}

fn default_tick_rate() -> u64 {
    600 // 600ms = standard RS tick rate
}

fn default_max_players() -> u16 {
    2000
}

fn default_max_npcs() -> u16 {
    8000
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data/players")
}

fn default_true() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_view_distance() -> u16 {
    15
}

fn default_max_local_players() -> usize {
    255
}

fn default_max_local_npcs() -> usize {
    255
}

fn default_frame_capacity() -> usize {
    4096
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            view_distance: default_view_distance(),
            max_local_players: default_max_local_players(),
            max_local_npcs: default_max_local_npcs(),
            frame_capacity: default_frame_capacity(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            world_id: default_world_id(),
            tick_rate_ms: default_tick_rate(),
            max_players: default_max_players(),
            max_npcs: default_max_npcs(),
            data_path: default_data_path(),
            members_world: default_true(),
            event_channel_capacity: default_event_channel_capacity(),
            sync: SyncConfig::default(),
            debug: false,
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("RUSTSCAPE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;
            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document, filling unset fields with defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RUSTSCAPE_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("RUSTSCAPE_WORLD_ID") {
            if let Ok(id) = val.parse() {
                self.world_id = id;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_TICK_RATE_MS") {
            if let Ok(rate) = val.parse() {
                self.tick_rate_ms = rate;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_MAX_PLAYERS") {
            if let Ok(max) = val.parse() {
                self.max_players = max;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_MAX_NPCS") {
            if let Ok(max) = val.parse() {
                self.max_npcs = max;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_DATA_PATH") {
            self.data_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("RUSTSCAPE_MEMBERS_WORLD") {
            self.members_world = is_truthy(&val);
        }
        if let Ok(val) = env::var("RUSTSCAPE_VIEW_DISTANCE") {
            if let Ok(distance) = val.parse() {
                self.sync.view_distance = distance;
            }
        }
        if let Ok(val) = env::var("RUSTSCAPE_DEBUG") {
            self.debug = is_truthy(&val);
        }
        if let Ok(val) = env::var("RUSTSCAPE_LOG_JSON") {
            self.log_json = is_truthy(&val);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.world_id == 0 {
            anyhow::bail!("World ID must be between 1 and 255");
        }

        // Player indices are 11 bits on the wire, 2047 is the terminator
        if self.max_players == 0 || self.max_players > MAX_PLAYER_INDEX {
            anyhow::bail!("Max players must be between 1 and 2046");
        }

        // NPC indices are 14 bits on the wire, 16383 is the terminator
        if self.max_npcs > 16382 {
            anyhow::bail!("Max NPCs must be at most 16382");
        }

        if self.tick_rate_ms < 100 || self.tick_rate_ms > 5000 {
            anyhow::bail!("Tick rate must be between 100ms and 5000ms");
        }

        // Additions carry 5-bit signed deltas
        if self.sync.view_distance == 0 || self.sync.view_distance > 15 {
            anyhow::bail!("View distance must be between 1 and 15");
        }

        // Local list counts are 8 bits on the wire
        if self.sync.max_local_players > 255 || self.sync.max_local_npcs > 255 {
            anyhow::bail!("Local list caps must be at most 255");
        }

        if self.event_channel_capacity == 0 {
            anyhow::bail!("Event channel capacity must be non-zero");
        }

        Ok(())
    }
}

fn is_truthy(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Rustscape");
        assert_eq!(config.world_id, 1);
        assert_eq!(config.tick_rate_ms, 600);
        assert_eq!(config.sync.view_distance, 15);
        assert_eq!(config.sync.max_local_players, 255);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            server_name = "Test"
            tick_rate_ms = 300

            [sync]
            view_distance = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.server_name, "Test");
        assert_eq!(config.tick_rate_ms, 300);
        assert_eq!(config.sync.view_distance, 8);
        assert_eq!(config.sync.max_local_npcs, 255);
        assert_eq!(config.max_players, 2000);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.world_id = 0;
        assert!(config.validate().is_err());
        config.world_id = 1;

        config.sync.view_distance = 16;
        assert!(config.validate().is_err());
        config.sync.view_distance = 15;

        config.max_players = 2047;
        assert!(config.validate().is_err());
        config.max_players = 10;

        config.tick_rate_ms = 50;
        assert!(config.validate().is_err());
    }
}
