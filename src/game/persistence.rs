//! Player persistence module
//!
//! Saving happens off the game loop: the tick hands a [`PlayerData`]
//! snapshot to a [`SaveDispatcher`] and moves on, and a
//! [`PersistenceWorker`] task writes it through a [`PlayerStore`].
//!
//! The bundled stores are a JSON file per player and an in-memory map.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{PersistenceError, Result};
use crate::game::mob::Position;
use crate::game::player::Appearance;

/// Longest name the client can log in with
pub const MAX_USERNAME_LENGTH: usize = 12;

/// Persisted skill entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillData {
    pub id: u8,
    pub level: u8,
    pub experience: u32,
}

/// Everything saved about a player between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    /// Username (lowercase, underscores)
    pub username: String,
    /// Display name
    pub display_name: String,
    /// Rights level
    #[serde(default)]
    pub rights: u8,
    /// Membership
    #[serde(default)]
    pub member: bool,
    /// Logout position
    #[serde(default = "default_position")]
    pub position: Position,
    /// Character design
    #[serde(default)]
    pub appearance: Appearance,
    /// Skill levels and experience
    #[serde(default)]
    pub skills: Vec<SkillData>,
    /// Run energy (0-100)
    #[serde(default = "default_run_energy")]
    pub run_energy: u8,
    /// When this snapshot was written
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
}

fn default_position() -> Position {
    Position::SPAWN
}

fn default_run_energy() -> u8 {
    100
}

impl PlayerData {
    /// A fresh character
    pub fn new(username: impl Into<String>) -> Self {
        let display_name = username.into();
        Self {
            username: display_name.to_lowercase().replace(' ', "_"),
            display_name,
            rights: 0,
            member: false,
            position: default_position(),
            appearance: Appearance::default(),
            skills: Vec::new(),
            run_energy: default_run_energy(),
            last_saved: None,
        }
    }
}

/// Check a username is safe to use as a storage key
pub fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LENGTH
        && username
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidName(username.to_string()).into())
    }
}

/// Backend that player snapshots are written to
pub trait PlayerStore: Send + Sync + 'static {
    /// Write a snapshot, replacing any previous one
    fn save(&self, data: &PlayerData) -> impl Future<Output = Result<()>> + Send;

    /// Read a player's snapshot, `None` if they have never been saved
    fn load(&self, username: &str) -> impl Future<Output = Result<Option<PlayerData>>> + Send;
}

/// One pretty-printed JSON file per player
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Store files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the saves
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a player is saved to
    pub fn path_for(&self, username: &str) -> Result<PathBuf> {
        validate_username(username)?;
        Ok(self.root.join(format!("{}.json", username)))
    }
}

impl PlayerStore for JsonFileStore {
    async fn save(&self, data: &PlayerData) -> Result<()> {
        let path = self.path_for(&data.username)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Write aside and rename so a crash never leaves a torn file
        let json = serde_json::to_vec_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(username = %data.username, path = %path.display(), "Player saved");
        Ok(())
    }

    async fn load(&self, username: &str) -> Result<Option<PlayerData>> {
        let path = self.path_for(username)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    players: DashMap<String, PlayerData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved players
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether nothing has been saved
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl PlayerStore for MemoryStore {
    async fn save(&self, data: &PlayerData) -> Result<()> {
        validate_username(&data.username)?;
        self.players.insert(data.username.clone(), data.clone());
        Ok(())
    }

    async fn load(&self, username: &str) -> Result<Option<PlayerData>> {
        Ok(self.players.get(username).map(|r| r.clone()))
    }
}

impl<S: PlayerStore> PlayerStore for Arc<S> {
    fn save(&self, data: &PlayerData) -> impl Future<Output = Result<()>> + Send {
        S::save(self, data)
    }

    fn load(&self, username: &str) -> impl Future<Output = Result<Option<PlayerData>>> + Send {
        S::load(self, username)
    }
}

/// Hands snapshots to the persistence worker without waiting
#[derive(Debug, Clone)]
pub struct SaveDispatcher {
    tx: mpsc::UnboundedSender<PlayerData>,
}

impl SaveDispatcher {
    /// Queue a snapshot for saving
    pub fn dispatch(&self, data: PlayerData) -> Result<()> {
        self.tx
            .send(data)
            .map_err(|_| PersistenceError::QueueClosed.into())
    }
}

/// Task that drains the save queue into a store
pub struct PersistenceWorker<S> {
    store: S,
    rx: mpsc::UnboundedReceiver<PlayerData>,
}

impl<S: PlayerStore> PersistenceWorker<S> {
    /// Create a worker and the dispatcher that feeds it
    pub fn new(store: S) -> (SaveDispatcher, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SaveDispatcher { tx }, Self { store, rx })
    }

    /// Save until every dispatcher is dropped, returning how many saves
    /// succeeded
    pub async fn run(mut self) -> usize {
        let mut saved = 0;
        let mut failed = 0;

        while let Some(mut data) = self.rx.recv().await {
            data.last_saved = Some(Utc::now());
            match self.store.save(&data).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    failed += 1;
                    error!(username = %data.username, error = %e, "Failed to save player");
                }
            }
        }

        info!(saved = saved, failed = failed, "Persistence worker stopped");
        saved
    }

    /// Run on the tokio runtime
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }
}
