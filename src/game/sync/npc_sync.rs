//! NPC synchronization manager
//!
//! Builds the NPC update frame (opcode 65) for each logged-in player. The
//! layout mirrors the player frame without the self section: local NPC
//! movement, additions carrying the NPC's definition id, then the blocks.
//! NPC blocks are identical for every observer, so added NPCs reuse the
//! cached block as well.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::Result;
use crate::game::mob::{Mob, MobKind, MobRef};
use crate::game::npc::Npc;
use crate::game::player::Player;
use crate::net::buffer::PacketBuffer;
use crate::protocol::messages::{OutgoingGamePacket, OutgoingOpcode};

use super::assembler::{assemble, AssemblyMode};
use super::block_cache::{BlockArena, BlockHandle};
use super::{
    delta_bits, write_local_movement, write_removal, MobFault, MobSyncState, Movement, SyncConfig,
    Viewport,
};

/// Index value that ends the additions list
const NPC_LIST_TERMINATOR: u32 = 16383;

/// NPC synchronization manager
pub struct NpcSyncManager {
    config: SyncConfig,
    /// Sync state per NPC, indexed by NPC index
    mobs: RwLock<HashMap<u16, MobSyncState>>,
    /// Local NPC list per observing player
    viewports: RwLock<HashMap<u16, Viewport>>,
}

impl NpcSyncManager {
    /// Create a new sync manager
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            config,
            mobs: RwLock::new(HashMap::new()),
            viewports: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking an NPC
    pub fn register_npc(&self, npc: &Npc) {
        self.mobs
            .write()
            .insert(npc.index, MobSyncState::new(npc.position()));
        debug!(npc_index = npc.index, "Registered NPC for sync");
    }

    /// Stop tracking an NPC, releasing any block it still holds
    pub fn unregister_npc(&self, npc_index: u16, arena: &mut BlockArena) {
        if let Some(mut state) = self.mobs.write().remove(&npc_index) {
            if let Err(e) = state.slot.set(arena, None) {
                warn!(npc_index = npc_index, error = %e, "Failed to release cached block");
            }
        }
    }

    /// Start building NPC frames for a player
    pub fn register_observer(&self, player_index: u16) {
        self.viewports
            .write()
            .insert(player_index, Viewport::default());
    }

    /// Stop building NPC frames for a player
    pub fn unregister_observer(&self, player_index: u16) {
        self.viewports.write().remove(&player_index);
    }

    /// The block cached for an NPC this tick
    pub fn cached_block(&self, npc_index: u16) -> Option<BlockHandle> {
        self.mobs.read().get(&npc_index).and_then(|s| s.slot.get())
    }

    /// NPC indices in an observer's local list
    pub fn local_npcs(&self, player_index: u16) -> Vec<u16> {
        self.viewports
            .read()
            .get(&player_index)
            .map(|v| v.local.clone())
            .unwrap_or_default()
    }

    /// Detect movement and cache this tick's blocks
    pub fn prepare(&self, npcs: &[Arc<Npc>], arena: &mut BlockArena) -> Vec<MobFault> {
        let mut faults = Vec::new();
        let mut mobs = self.mobs.write();

        for npc in npcs {
            let Some(state) = mobs.get_mut(&npc.index) else {
                continue;
            };
            state.movement = Movement::between(&state.last_position, &npc.position());
            if let Err(e) = npc.wire_id() {
                faults.push(MobFault::new(MobKind::Npc, npc.index, e));
                continue;
            }

            match assemble(MobRef::Npc(npc), AssemblyMode::UpdateLocal) {
                Ok(Some(bytes)) => {
                    let handle = arena.insert(bytes);
                    if let Err(e) = state.slot.set(arena, Some(handle)) {
                        faults.push(MobFault::new(MobKind::Npc, npc.index, e));
                    }
                }
                Ok(None) => {}
                Err(e) => faults.push(MobFault::new(MobKind::Npc, npc.index, e)),
            }
        }

        faults
    }

    /// Build every observer's NPC frame in parallel
    pub fn build_frames(
        &self,
        players: &BTreeMap<u16, Arc<Player>>,
        npcs: &BTreeMap<u16, Arc<Npc>>,
        arena: &BlockArena,
    ) -> Vec<(u16, Result<OutgoingGamePacket>)> {
        let mobs_guard = self.mobs.read();
        let mobs: &HashMap<u16, MobSyncState> = &mobs_guard;
        let mut viewports = self.viewports.write();

        let mut frames: Vec<(u16, Result<OutgoingGamePacket>)> = viewports
            .par_iter_mut()
            .filter_map(|(&index, viewport)| {
                let observer = players.get(&index)?;
                Some((index, self.build_frame(observer, viewport, npcs, mobs, arena)))
            })
            .collect();
        frames.sort_by_key(|(index, _)| *index);
        frames
    }

    /// Release this tick's blocks and remember where every NPC ended up
    pub fn finish(&self, npcs: &[Arc<Npc>], arena: &mut BlockArena) {
        let mut mobs = self.mobs.write();
        for npc in npcs {
            if let Some(state) = mobs.get_mut(&npc.index) {
                if let Err(e) = state.slot.set(arena, None) {
                    warn!(npc_index = npc.index, error = %e, "Failed to release cached block");
                }
                state.last_position = npc.position();
                state.movement = Movement::None;
            }
        }
    }

    fn build_frame(
        &self,
        observer: &Player,
        viewport: &mut Viewport,
        npcs: &BTreeMap<u16, Arc<Npc>>,
        mobs: &HashMap<u16, MobSyncState>,
        arena: &BlockArena,
    ) -> Result<OutgoingGamePacket> {
        let mut frame = PacketBuffer::with_capacity(self.config.frame_capacity);
        let mut blocks = PacketBuffer::with_capacity(self.config.frame_capacity);
        let position = observer.position();
        let cached = |index: u16| {
            mobs.get(&index)
                .and_then(|state| state.slot.get())
                .and_then(|handle| arena.get(handle))
        };

        frame.start_bit_access();
        frame.write_bits(8, viewport.local.len() as u32)?;

        let mut local = Vec::with_capacity(viewport.local.len());
        for &npc_index in &viewport.local {
            let movement = match (npcs.get(&npc_index), mobs.get(&npc_index)) {
                (Some(npc), Some(state))
                    if state.movement != Movement::Teleport
                        && npc
                            .position()
                            .within_distance(&position, self.config.view_distance) =>
                {
                    state.movement
                }
                _ => {
                    write_removal(&mut frame)?;
                    continue;
                }
            };

            let block = cached(npc_index);
            write_local_movement(&mut frame, movement, block.is_some())?;
            if let Some(block) = block {
                blocks.write_bytes(block);
            }
            local.push(npc_index);
        }

        for (&npc_index, npc) in npcs {
            if local.len() >= self.config.max_local_npcs {
                break;
            }
            if local.contains(&npc_index) || !mobs.contains_key(&npc_index) {
                continue;
            }
            let npc_position = npc.position();
            if !npc_position.within_distance(&position, self.config.view_distance) {
                continue;
            }
            // prepare already reported it; leave it out of this frame
            let Ok(id) = npc.wire_id() else {
                continue;
            };

            let block = cached(npc_index);
            frame.write_bits(14, npc_index as u32)?;
            frame.write_bits(5, delta_bits(position.y, npc_position.y))?;
            frame.write_bits(5, delta_bits(position.x, npc_position.x))?;
            frame.write_bit(true)?; // discard walking queue
            frame.write_bits(12, id as u32)?;
            frame.write_bit(block.is_some())?;
            if let Some(block) = block {
                blocks.write_bytes(block);
            }
            local.push(npc_index);
        }

        if !blocks.is_empty() {
            frame.write_bits(14, NPC_LIST_TERMINATOR)?;
        }
        frame.end_bit_access();
        frame.write_bytes(blocks.as_bytes());

        viewport.local = local;
        Ok(OutgoingGamePacket::variable_short(
            OutgoingOpcode::NpcUpdate,
            frame.freeze(),
        ))
    }
}

impl Default for NpcSyncManager {
    fn default() -> Self {
        Self::new()
    }
}
