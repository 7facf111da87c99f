//! NPC module
//!
//! Server-controlled mobs. NPCs share the update machinery with players
//! but have no session, no appearance block and their own mask table.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{GameError, Result};
use crate::game::mob::{Hitpoints, Mob, MobKind, MobUpdates, Position};

/// Maximum NPC index value
pub const MAX_NPC_INDEX: u16 = 16383;

/// Largest definition id an NPC addition can carry
pub const MAX_NPC_ID: u16 = 0xFFF;

/// A server-controlled mob
pub struct Npc {
    /// NPC index (1-16383)
    pub index: u16,
    /// Definition id the NPC spawned as
    pub id: u16,
    /// Tile footprint
    pub size: u8,
    /// Where the NPC spawned
    pub spawn_position: Position,
    /// Definition id currently shown (differs after a transform)
    current_id: RwLock<u16>,
    /// Current position
    position: RwLock<Position>,
    /// Current and maximum hitpoints
    hitpoints: RwLock<Hitpoints>,
    /// This tick's flags and payloads
    updates: RwLock<MobUpdates>,
}

impl Npc {
    /// Create a new NPC
    pub fn new(index: u16, id: u16, position: Position, size: u8, max_hitpoints: u8) -> Self {
        Self {
            index,
            id,
            size,
            spawn_position: position,
            current_id: RwLock::new(id),
            position: RwLock::new(position),
            hitpoints: RwLock::new(Hitpoints {
                current: max_hitpoints,
                max: max_hitpoints,
            }),
            updates: RwLock::new(MobUpdates::new()),
        }
    }

    /// Definition id currently shown
    pub fn current_id(&self) -> u16 {
        *self.current_id.read()
    }

    /// The current id, or `InvalidNpcId` if observers cannot be sent it
    pub fn wire_id(&self) -> Result<u16> {
        let id = self.current_id();
        if id > MAX_NPC_ID {
            return Err(GameError::InvalidNpcId {
                index: self.index,
                id,
            }
            .into());
        }
        Ok(id)
    }

    /// Swap to another definition and tell observers
    pub fn transform(&self, id: u16) {
        *self.current_id.write() = id;
        self.updates.write().transform(id);
    }

    /// Move the NPC
    pub fn set_position(&self, position: Position) {
        *self.position.write() = position;
    }

    /// Apply damage, clamping at zero
    pub fn damage(&self, amount: u8) {
        let mut hp = self.hitpoints.write();
        hp.current = hp.current.saturating_sub(amount);
    }
}

impl Mob for Npc {
    fn index(&self) -> u16 {
        self.index
    }

    fn kind(&self) -> MobKind {
        MobKind::Npc
    }

    fn position(&self) -> Position {
        *self.position.read()
    }

    fn size(&self) -> u8 {
        self.size
    }

    fn hitpoints(&self) -> Hitpoints {
        *self.hitpoints.read()
    }

    fn updates(&self) -> &RwLock<MobUpdates> {
        &self.updates
    }
}

impl std::fmt::Debug for Npc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Npc")
            .field("index", &self.index)
            .field("id", &self.current_id())
            .field("position", &self.position())
            .finish()
    }
}

/// NPC registry
pub struct NpcManager {
    npcs: DashMap<u16, Arc<Npc>>,
    next_index: AtomicU16,
    max_npcs: u16,
}

impl NpcManager {
    /// Create a new NPC manager
    pub fn new(max_npcs: u16) -> Self {
        Self {
            npcs: DashMap::new(),
            next_index: AtomicU16::new(1),
            max_npcs: max_npcs.min(MAX_NPC_INDEX),
        }
    }

    /// Spawn an NPC
    pub fn spawn(&self, id: u16, position: Position, size: u8, max_hitpoints: u8) -> Result<Arc<Npc>> {
        let index = self.allocate_index()?;
        let npc = Arc::new(Npc::new(index, id, position, size, max_hitpoints));
        self.npcs.insert(index, npc.clone());
        debug!(index = index, id = id, position = %position, "NPC spawned");
        Ok(npc)
    }

    /// Remove an NPC
    pub fn despawn(&self, index: u16) {
        if let Some((_, npc)) = self.npcs.remove(&index) {
            info!(index = index, id = npc.id, "NPC despawned");
        }
    }

    /// Get an NPC by index
    pub fn get(&self, index: u16) -> Option<Arc<Npc>> {
        self.npcs.get(&index).map(|r| r.clone())
    }

    /// Number of NPCs
    pub fn count(&self) -> usize {
        self.npcs.len()
    }

    /// Every NPC, ordered by index
    pub fn all(&self) -> Vec<Arc<Npc>> {
        let mut npcs: Vec<Arc<Npc>> = self.npcs.iter().map(|r| r.clone()).collect();
        npcs.sort_by_key(|n| n.index);
        npcs
    }

    fn allocate_index(&self) -> Result<u16> {
        for _ in 0..self.max_npcs {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            if index == 0 || index > self.max_npcs {
                self.next_index.store(1, Ordering::SeqCst);
                continue;
            }
            if !self.npcs.contains_key(&index) {
                return Ok(index);
            }
        }
        Err(GameError::WorldFull.into())
    }
}

impl Default for NpcManager {
    fn default() -> Self {
        Self::new(MAX_NPC_INDEX)
    }
}
