//! Player synchronization manager
//!
//! Each game tick this builds a player update frame (opcode 81) for each
//! logged-in player containing:
//! - Their own movement/teleport
//! - Other players entering/leaving their viewport
//! - Update blocks for all visible players (appearance, animation, chat, etc.)
//!
//! Blocks for players already in a local list are encoded once in
//! [`PlayerSyncManager::prepare`] and shared through the [`BlockArena`].
//! Only the per-observer variants (self and newly added) are encoded while
//! building frames.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::error::{GameError, Result};
use crate::game::mob::{Mob, MobKind, MobRef};
use crate::game::player::Player;
use crate::net::buffer::PacketBuffer;
use crate::protocol::messages::{build_region, OutgoingGamePacket, OutgoingOpcode};

use super::assembler::{assemble, AssemblyMode};
use super::block_cache::{BlockArena, BlockHandle};
use super::update_flags::UpdateFlag;
use super::{
    delta_bits, write_local_movement, write_removal, MobFault, MobSyncState, Movement, SyncConfig,
    Viewport,
};

/// Index value that ends the additions list
const PLAYER_LIST_TERMINATOR: u32 = 2047;

/// Player synchronization manager
pub struct PlayerSyncManager {
    config: SyncConfig,
    /// Sync state per player, indexed by player index
    mobs: RwLock<HashMap<u16, MobSyncState>>,
    /// Local player list per observing player
    viewports: RwLock<HashMap<u16, Viewport>>,
}

impl PlayerSyncManager {
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

    /// Register a player for synchronization
    pub fn register(&self, player: &Player) {
        self.mobs
            .write()
            .insert(player.index, MobSyncState::new(player.position()));
        self.viewports.write().insert(player.index, Viewport::default());
        debug!(player_index = player.index, "Registered player for sync");
    }

    /// Unregister a player, releasing any block it still holds
    ///
    /// Other observers drop the player from their local lists on the next
    /// frame they build.
    pub fn unregister(&self, player_index: u16, arena: &mut BlockArena) {
        if let Some(mut state) = self.mobs.write().remove(&player_index) {
            if let Err(e) = state.slot.set(arena, None) {
                warn!(player_index = player_index, error = %e, "Failed to release cached block");
            }
        }
        self.viewports.write().remove(&player_index);
        debug!(player_index = player_index, "Unregistered player from sync");
    }

    /// Whether a player is registered
    pub fn is_registered(&self, player_index: u16) -> bool {
        self.mobs.read().contains_key(&player_index)
    }

    /// The block cached for a player this tick
    pub fn cached_block(&self, player_index: u16) -> Option<BlockHandle> {
        self.mobs.read().get(&player_index).and_then(|s| s.slot.get())
    }

    /// Movement detected for a player this tick
    pub fn movement(&self, player_index: u16) -> Option<Movement> {
        self.mobs.read().get(&player_index).map(|s| s.movement)
    }

    /// Player indices in an observer's local list
    pub fn local_players(&self, observer_index: u16) -> Vec<u16> {
        self.viewports
            .read()
            .get(&observer_index)
            .map(|v| v.local.clone())
            .unwrap_or_default()
    }

    /// Detect movement, consume region changes and cache this tick's blocks
    ///
    /// A player whose block fails to assemble keeps an empty slot, so
    /// observers see it without updates this tick.
    pub fn prepare(&self, players: &[Arc<Player>], arena: &mut BlockArena) -> Vec<MobFault> {
        let mut faults = Vec::new();
        let mut mobs = self.mobs.write();

        for player in players {
            let Some(state) = mobs.get_mut(&player.index) else {
                continue;
            };

            let position = player.position();
            state.movement = Movement::between(&state.last_position, &position);

            let region_changed = player.updates().read().flags.is_flagged(UpdateFlag::Region)
                || player
                    .last_region()
                    .map_or(true, |region| !position.within_loaded_region(&region));
            if state.region_changed {
                state.movement = Movement::Teleport;
            } else if region_changed {
                match player.queue(build_region(position)) {
                    Ok(()) => {
                        player.set_last_region(position);
                        state.region_changed = true;
                        state.movement = Movement::Teleport;
                        trace!(player_index = player.index, position = %position, "Region rebuilt");
                    }
                    Err(e) => {
                        faults.push(MobFault::new(MobKind::Player, player.index, e));
                        continue;
                    }
                }
            }

            match assemble(MobRef::Player(player), AssemblyMode::UpdateLocal) {
                Ok(Some(bytes)) => {
                    let handle = arena.insert(bytes);
                    if let Err(e) = state.slot.set(arena, Some(handle)) {
                        faults.push(MobFault::new(MobKind::Player, player.index, e));
                    }
                }
                Ok(None) => {}
                Err(e) => faults.push(MobFault::new(MobKind::Player, player.index, e)),
            }
        }

        faults
    }

    /// Build every observer's frame
    ///
    /// Frames are built in parallel. Shared state is read-only here; each
    /// observer only writes its own viewport.
    pub fn build_frames(
        &self,
        players: &BTreeMap<u16, Arc<Player>>,
        arena: &BlockArena,
    ) -> Vec<(u16, Result<OutgoingGamePacket>)> {
        let mobs_guard = self.mobs.read();
        let mobs: &HashMap<u16, MobSyncState> = &mobs_guard;
        let mut viewports = self.viewports.write();

        let mut frames: Vec<(u16, Result<OutgoingGamePacket>)> = viewports
            .par_iter_mut()
            .filter_map(|(&index, viewport)| {
                let observer = players.get(&index)?;
                Some((index, self.build_frame(observer, viewport, players, mobs, arena)))
            })
            .collect();
        frames.sort_by_key(|(index, _)| *index);
        frames
    }

    /// Release this tick's blocks and remember where everyone ended up
    pub fn finish(&self, players: &[Arc<Player>], arena: &mut BlockArena) {
        let mut mobs = self.mobs.write();
        for player in players {
            if let Some(state) = mobs.get_mut(&player.index) {
                if let Err(e) = state.slot.set(arena, None) {
                    warn!(player_index = player.index, error = %e, "Failed to release cached block");
                }
                state.last_position = player.position();
                state.movement = Movement::None;
                state.region_changed = false;
            }
        }
    }

    fn build_frame(
        &self,
        observer: &Player,
        viewport: &mut Viewport,
        players: &BTreeMap<u16, Arc<Player>>,
        mobs: &HashMap<u16, MobSyncState>,
        arena: &BlockArena,
    ) -> Result<OutgoingGamePacket> {
        let own = mobs
            .get(&observer.index)
            .ok_or(GameError::PlayerNotFound(observer.index))?;
        let mut frame = PacketBuffer::with_capacity(self.config.frame_capacity);
        let mut blocks = PacketBuffer::with_capacity(self.config.frame_capacity);

        frame.start_bit_access();

        let self_block = assemble(MobRef::Player(observer), AssemblyMode::UpdateSelf)?;
        self.write_self_movement(&mut frame, observer, own.movement, self_block.is_some())?;
        if let Some(block) = &self_block {
            blocks.write_bytes(block);
        }

        let position = observer.position();
        frame.write_bits(8, viewport.local.len() as u32)?;

        let mut local = Vec::with_capacity(viewport.local.len());
        for &other_index in &viewport.local {
            let visible = match (players.get(&other_index), mobs.get(&other_index)) {
                (Some(other), Some(state)) => {
                    other_index != observer.index
                        && state.movement != Movement::Teleport
                        && other
                            .position()
                            .within_distance(&position, self.config.view_distance)
                }
                _ => false,
            };
            if !visible {
                write_removal(&mut frame)?;
                continue;
            }

            let block = mobs
                .get(&other_index)
                .and_then(|state| state.slot.get())
                .and_then(|handle| arena.get(handle));
            let movement = mobs
                .get(&other_index)
                .map_or(Movement::None, |state| state.movement);
            write_local_movement(&mut frame, movement, block.is_some())?;
            if let Some(block) = block {
                blocks.write_bytes(block);
            }
            local.push(other_index);
        }

        for (&other_index, other) in players {
            if local.len() >= self.config.max_local_players {
                break;
            }
            if other_index == observer.index || local.contains(&other_index) {
                continue;
            }
            let other_position = other.position();
            if !other_position.within_distance(&position, self.config.view_distance) {
                continue;
            }

            let block = match assemble(MobRef::Player(other), AssemblyMode::AddLocal) {
                Ok(block) => block,
                Err(e) => {
                    warn!(
                        observer = observer.index,
                        player_index = other_index,
                        error = %e,
                        "Failed to assemble block for added player"
                    );
                    continue;
                }
            };

            frame.write_bits(11, other_index as u32)?;
            frame.write_bit(block.is_some())?;
            frame.write_bit(true)?; // discard walking queue
            frame.write_bits(5, delta_bits(position.y, other_position.y))?;
            frame.write_bits(5, delta_bits(position.x, other_position.x))?;
            if let Some(block) = &block {
                blocks.write_bytes(block);
            }
            local.push(other_index);
        }

        if !blocks.is_empty() {
            frame.write_bits(11, PLAYER_LIST_TERMINATOR)?;
        }
        frame.end_bit_access();
        frame.write_bytes(blocks.as_bytes());

        viewport.local = local;
        Ok(OutgoingGamePacket::variable_short(
            OutgoingOpcode::PlayerUpdate,
            frame.freeze(),
        ))
    }

    /// Self movement; unlike other players, a teleport is sent in place
    fn write_self_movement(
        &self,
        frame: &mut PacketBuffer,
        player: &Player,
        movement: Movement,
        has_block: bool,
    ) -> Result<()> {
        if movement != Movement::Teleport {
            return write_local_movement(frame, movement, has_block);
        }

        let position = player.position();
        let region = player.last_region().unwrap_or(position);
        frame.write_bit(true)?;
        frame.write_bits(2, 3)?;
        frame.write_bits(2, position.z as u32)?;
        frame.write_bit(true)?; // discard walking queue
        frame.write_bit(has_block)?;
        frame.write_bits(7, position.local_y(&region) as u32)?;
        frame.write_bits(7, position.local_x(&region) as u32)?;
        Ok(())
    }
}

impl Default for PlayerSyncManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::mob::{Hit, HitType, Position};
    use crate::net::session::{Session, SessionState};
    use pretty_assertions::assert_eq;

    fn logged_in(index: u16, position: Position) -> Arc<Player> {
        let player = Arc::new(Player::new(index, format!("player{}", index)));
        player.set_position(position);
        let session = Arc::new(Session::new(index as u64, "127.0.0.1:0".parse().unwrap()));
        session
            .advance(SessionState::Connected, SessionState::LoginQueue)
            .unwrap();
        session
            .advance(SessionState::LoginQueue, SessionState::LoggedIn)
            .unwrap();
        player.set_session(session).unwrap();
        player
    }

    fn roster(players: &[Arc<Player>]) -> BTreeMap<u16, Arc<Player>> {
        players.iter().map(|p| (p.index, p.clone())).collect()
    }

    /// One full tick without resets in between
    fn run_tick(
        manager: &PlayerSyncManager,
        players: &[Arc<Player>],
        arena: &mut BlockArena,
    ) -> Vec<(u16, Result<OutgoingGamePacket>)> {
        let faults = manager.prepare(players, arena);
        assert!(faults.is_empty());
        let frames = manager.build_frames(&roster(players), arena);
        manager.finish(players, arena);
        for player in players {
            player.reset_updates();
        }
        frames
    }

    #[test]
    fn test_first_tick_rebuilds_region_and_teleports() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let player = logged_in(1, Position::SPAWN);
        manager.register(&player);

        manager.prepare(&[player.clone()], &mut arena);
        assert_eq!(manager.movement(1), Some(Movement::Teleport));
        assert_eq!(player.last_region(), Some(Position::SPAWN));

        let pending = player.session().unwrap().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].opcode, OutgoingOpcode::Region.as_u8());
    }

    #[test]
    fn test_region_flag_held_until_reset() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let player = logged_in(1, Position::SPAWN);
        manager.register(&player);
        run_tick(&manager, &[player.clone()], &mut arena);
        player.session().unwrap().drain_pending();

        player.flag(UpdateFlag::Region);
        manager.prepare(&[player.clone()], &mut arena);
        assert!(player.updates().read().flags.is_flagged(UpdateFlag::Region));
        assert_eq!(manager.movement(1), Some(Movement::Teleport));

        // a second pass in the same tick does not rebuild again
        manager.prepare(&[player.clone()], &mut arena);
        assert_eq!(player.session().unwrap().pending_count(), 1);

        manager.finish(&[player.clone()], &mut arena);
        player.reset_updates();
        assert!(!player.updates().read().flags.any_flagged());

        manager.prepare(&[player.clone()], &mut arena);
        assert_eq!(manager.movement(1), Some(Movement::None));
        assert_eq!(player.session().unwrap().pending_count(), 1);
    }

    #[test]
    fn test_quiet_player_has_no_cached_block() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let player = logged_in(1, Position::SPAWN);
        manager.register(&player);
        run_tick(&manager, &[player.clone()], &mut arena);

        manager.prepare(&[player.clone()], &mut arena);
        assert_eq!(manager.cached_block(1), None);
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn test_block_released_after_finish() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let player = logged_in(1, Position::SPAWN);
        manager.register(&player);
        player.updates().write().primary_hit(Hit::new(3, HitType::Normal));

        manager.prepare(&[player.clone()], &mut arena);
        let handle = manager.cached_block(1).unwrap();
        assert_eq!(arena.ref_count(handle), 1);

        manager.finish(&[player.clone()], &mut arena);
        assert_eq!(arena.get(handle), None);
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn test_players_see_each_other() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let a = logged_in(1, Position::new(3222, 3222, 0));
        let b = logged_in(2, Position::new(3225, 3220, 0));
        let far = logged_in(3, Position::new(3300, 3300, 0));
        for p in [&a, &b, &far] {
            manager.register(p);
        }

        let frames = run_tick(&manager, &[a.clone(), b.clone(), far.clone()], &mut arena);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|(_, f)| f.is_ok()));
        assert_eq!(manager.local_players(1), vec![2]);
        assert_eq!(manager.local_players(2), vec![1]);
        assert!(manager.local_players(3).is_empty());
    }

    #[test]
    fn test_frame_shape_for_walking_local() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let a = logged_in(1, Position::new(3222, 3222, 0));
        let b = logged_in(2, Position::new(3223, 3222, 0));
        manager.register(&a);
        manager.register(&b);
        run_tick(&manager, &[a.clone(), b.clone()], &mut arena);

        b.set_position(Position::new(3224, 3222, 0));
        let frames = run_tick(&manager, &[a.clone(), b.clone()], &mut arena);
        let (_, frame) = frames.iter().find(|(i, _)| *i == 1).unwrap();
        let frame = frame.as_ref().unwrap();

        let buf = PacketBuffer::from_bytes(&frame.data);
        // self: no update
        assert_eq!(buf.peek_bits(0, 1), 0);
        // one local player
        assert_eq!(buf.peek_bits(1, 8), 1);
        // walk east, no block
        assert_eq!(buf.peek_bits(9, 7), 0b1_01_100_0);
        // no blocks, so no terminator: padded to two bytes
        assert_eq!(frame.data.len(), 2);
        assert_eq!(frame.opcode, OutgoingOpcode::PlayerUpdate.as_u8());
    }

    #[test]
    fn test_cached_block_shared_between_observers() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let a = logged_in(1, Position::new(3222, 3222, 0));
        let b = logged_in(2, Position::new(3223, 3222, 0));
        let c = logged_in(3, Position::new(3221, 3222, 0));
        for p in [&a, &b, &c] {
            manager.register(p);
        }
        run_tick(&manager, &[a.clone(), b.clone(), c.clone()], &mut arena);

        a.updates().write().primary_hit(Hit::new(7, HitType::Normal));
        let frames = run_tick(&manager, &[a.clone(), b.clone(), c.clone()], &mut arena);

        let expected = [0x20u8, 7, 1 + 128, 10u8.wrapping_neg(), 10];
        for observer in [2u16, 3] {
            let (_, frame) = frames.iter().find(|(i, _)| *i == observer).unwrap();
            let data = &frame.as_ref().unwrap().data;
            assert!(data.ends_with(&expected));
        }
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn test_unregistered_player_removed_from_local_list() {
        let manager = PlayerSyncManager::new();
        let mut arena = BlockArena::new();
        let a = logged_in(1, Position::new(3222, 3222, 0));
        let b = logged_in(2, Position::new(3223, 3222, 0));
        manager.register(&a);
        manager.register(&b);
        run_tick(&manager, &[a.clone(), b.clone()], &mut arena);
        assert_eq!(manager.local_players(1), vec![2]);

        manager.unregister(2, &mut arena);
        let frames = run_tick(&manager, &[a.clone()], &mut arena);
        let data = &frames[0].1.as_ref().unwrap().data;
        let buf = PacketBuffer::from_bytes(data);
        assert_eq!(buf.peek_bits(1, 8), 1);
        // removal: 1, 11
        assert_eq!(buf.peek_bits(9, 3), 0b111);
        assert!(manager.local_players(1).is_empty());
    }

    #[test]
    fn test_local_cap() {
        let config = SyncConfig {
            max_local_players: 1,
            ..SyncConfig::default()
        };
        let manager = PlayerSyncManager::with_config(config);
        let mut arena = BlockArena::new();
        let players: Vec<Arc<Player>> = (1..=3)
            .map(|i| logged_in(i, Position::new(3222 + i, 3222, 0)))
            .collect();
        for p in &players {
            manager.register(p);
        }
        run_tick(&manager, &players, &mut arena);
        assert_eq!(manager.local_players(1), vec![2]);
    }
}
