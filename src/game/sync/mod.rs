//! Entity synchronization module
//!
//! Delivers every mob's per-tick state changes to every observer:
//! - Tracking dirty flags per mob
//! - Encoding update blocks and caching them once per tick
//! - Building the player (opcode 81) and NPC (opcode 65) update frames
//! - Tracking local lists (who can see whom)

pub mod assembler;
pub mod block_cache;
pub mod blocks;
pub mod npc_sync;
pub mod player_sync;
pub mod update_flags;

pub use assembler::{assemble, AssemblyMode};
pub use block_cache::{BlockArena, BlockHandle, CachedBlockSlot};
pub use blocks::UpdateBlock;
pub use npc_sync::NpcSyncManager;
pub use player_sync::PlayerSyncManager;
pub use update_flags::{UpdateFlag, UpdateFlagSet};

pub use crate::config::SyncConfig;

use crate::error::{Result, RustscapeError};
use crate::game::mob::{Direction, MobKind, Position};
use crate::net::buffer::PacketBuffer;

/// Movement a mob made since the previous tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Movement {
    /// Stood still
    #[default]
    None,
    /// One tile
    Walk(Direction),
    /// Two tiles
    Run(Direction, Direction),
    /// Anything else: plane change, long jump or region rebuild
    Teleport,
}

impl Movement {
    /// Classify the move from `from` to `to`
    ///
    /// Two-tile moves are split into a diagonal step toward the target
    /// followed by the remainder.
    pub fn between(from: &Position, to: &Position) -> Self {
        if from == to {
            return Movement::None;
        }
        if from.z != to.z {
            return Movement::Teleport;
        }
        if let Some(direction) = Direction::between(from, to) {
            return Movement::Walk(direction);
        }

        let (dx, dy) = from.delta(to);
        if dx.abs() > 2 || dy.abs() > 2 {
            return Movement::Teleport;
        }
        let midway = Position::new(
            (from.x as i32 + dx.signum()) as u16,
            (from.y as i32 + dy.signum()) as u16,
            from.z,
        );
        match (Direction::between(from, &midway), Direction::between(&midway, to)) {
            (Some(first), Some(second)) => Movement::Run(first, second),
            _ => Movement::Teleport,
        }
    }
}

/// Sync-side state for one mob
#[derive(Debug, Clone, Default)]
pub struct MobSyncState {
    /// Position at the end of the previous tick
    pub last_position: Position,
    /// Movement detected this tick
    pub movement: Movement,
    /// This tick's cached `UpdateLocal` block
    pub slot: CachedBlockSlot,
    /// Region rebuild already queued this tick
    pub region_changed: bool,
}

impl MobSyncState {
    /// State for a mob first seen at `position`
    pub fn new(position: Position) -> Self {
        Self {
            last_position: position,
            movement: Movement::None,
            slot: CachedBlockSlot::new(),
            region_changed: false,
        }
    }
}

/// What one observer currently has in its local list
#[derive(Debug, Clone, Default)]
pub struct Viewport {
    /// Indices in the order the client holds them
    pub local: Vec<u16>,
}

/// A mob that failed its sync step this tick
#[derive(Debug)]
pub struct MobFault {
    /// Player or NPC
    pub kind: MobKind,
    /// Registry index
    pub index: u16,
    /// What went wrong
    pub error: RustscapeError,
}

impl MobFault {
    pub fn new(kind: MobKind, index: u16, error: RustscapeError) -> Self {
        Self { kind, index, error }
    }
}

/// Write the walk/run/stand bits shared by local players and NPCs
///
/// Teleports never reach here: the mob is removed from the local list and
/// re-added instead.
pub(crate) fn write_local_movement(
    buf: &mut PacketBuffer,
    movement: Movement,
    has_block: bool,
) -> Result<()> {
    match movement {
        Movement::Walk(direction) => {
            buf.write_bit(true)?;
            buf.write_bits(2, 1)?;
            buf.write_bits(3, direction.id() as u32)?;
            buf.write_bit(has_block)?;
        }
        Movement::Run(first, second) => {
            buf.write_bit(true)?;
            buf.write_bits(2, 2)?;
            buf.write_bits(3, first.id() as u32)?;
            buf.write_bits(3, second.id() as u32)?;
            buf.write_bit(has_block)?;
        }
        Movement::None | Movement::Teleport if has_block => {
            buf.write_bit(true)?;
            buf.write_bits(2, 0)?;
        }
        Movement::None | Movement::Teleport => buf.write_bit(false)?,
    }
    Ok(())
}

/// Remove an entry from the local list
pub(crate) fn write_removal(buf: &mut PacketBuffer) -> Result<()> {
    buf.write_bit(true)?;
    buf.write_bits(2, 3)
}

/// Signed 5-bit delta as the client reads it
pub(crate) fn delta_bits(from: u16, to: u16) -> u32 {
    ((to as i32 - from as i32) & 0x1F) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_walk() {
        let from = Position::new(3222, 3222, 0);
        assert_eq!(
            Movement::between(&from, &Position::new(3223, 3222, 0)),
            Movement::Walk(Direction::East)
        );
        assert_eq!(Movement::between(&from, &from), Movement::None);
    }

    #[test]
    fn test_movement_run() {
        let from = Position::new(3222, 3222, 0);
        assert_eq!(
            Movement::between(&from, &Position::new(3224, 3222, 0)),
            Movement::Run(Direction::East, Direction::East)
        );
        assert_eq!(
            Movement::between(&from, &Position::new(3224, 3223, 0)),
            Movement::Run(Direction::NorthEast, Direction::East)
        );
        assert_eq!(
            Movement::between(&from, &Position::new(3220, 3220, 0)),
            Movement::Run(Direction::SouthWest, Direction::SouthWest)
        );
    }

    #[test]
    fn test_movement_teleport() {
        let from = Position::new(3222, 3222, 0);
        assert_eq!(
            Movement::between(&from, &Position::new(3225, 3222, 0)),
            Movement::Teleport
        );
        assert_eq!(
            Movement::between(&from, &Position::new(3222, 3222, 1)),
            Movement::Teleport
        );
    }

    #[test]
    fn test_local_movement_bits() {
        let mut buf = PacketBuffer::new();
        buf.start_bit_access();
        write_local_movement(&mut buf, Movement::Walk(Direction::North), true).unwrap();
        // 1, 01, 001, 1
        assert_eq!(buf.peek_bits(0, 7), 0b1_01_001_1);

        let mut buf = PacketBuffer::new();
        buf.start_bit_access();
        write_local_movement(&mut buf, Movement::None, false).unwrap();
        assert_eq!(buf.peek_bits(0, 1), 0);
    }

    #[test]
    fn test_delta_bits() {
        assert_eq!(delta_bits(3222, 3225), 3);
        assert_eq!(delta_bits(3222, 3220), 0b11110);
    }
}
