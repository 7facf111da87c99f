//! Mob module
//!
//! Types shared by every mobile entity the sync layer reports on:
//! - World positions and region arithmetic
//! - Transient per-tick payloads (chat, hits, forced movement, ...)
//! - The [`Mob`] capability trait implemented by players and NPCs
//! - [`MobRef`], the closed set the block encoders dispatch on

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::game::npc::Npc;
use crate::game::player::Player;
use crate::game::sync::update_flags::{UpdateFlag, UpdateFlagSet};

/// Position in the game world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: u16,
    /// Y coordinate
    pub y: u16,
    /// Height level (0-3)
    pub z: u8,
}

impl Position {
    /// Default spawn (Lumbridge)
    pub const SPAWN: Position = Position {
        x: 3222,
        y: 3222,
        z: 0,
    };

    /// Create a new position
    pub const fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Chunk X of the region centre the client is told to load
    pub fn central_region_x(&self) -> u16 {
        self.x >> 3
    }

    /// Chunk Y of the region centre the client is told to load
    pub fn central_region_y(&self) -> u16 {
        self.y >> 3
    }

    /// Chunk X of the loaded map's south-west corner
    pub fn top_left_region_x(&self) -> u16 {
        self.central_region_x().saturating_sub(6)
    }

    /// Chunk Y of the loaded map's south-west corner
    pub fn top_left_region_y(&self) -> u16 {
        self.central_region_y().saturating_sub(6)
    }

    /// X relative to the map loaded around `base`
    pub fn local_x(&self, base: &Position) -> u16 {
        self.x.wrapping_sub(base.top_left_region_x() * 8)
    }

    /// Y relative to the map loaded around `base`
    pub fn local_y(&self, base: &Position) -> u16 {
        self.y.wrapping_sub(base.top_left_region_y() * 8)
    }

    /// Check if within `distance` tiles on both axes, same plane
    pub fn within_distance(&self, other: &Position, distance: u16) -> bool {
        if self.z != other.z {
            return false;
        }
        let dx = (self.x as i32 - other.x as i32).abs();
        let dy = (self.y as i32 - other.y as i32).abs();
        dx <= distance as i32 && dy <= distance as i32
    }

    /// Whether the client, having loaded the map around `last_region`,
    /// still has this position inside its inner viewport
    pub fn within_loaded_region(&self, last_region: &Position) -> bool {
        let dx = self.x as i32 - (last_region.top_left_region_x() as i32 * 8);
        let dy = self.y as i32 - (last_region.top_left_region_y() as i32 * 8);
        (16..88).contains(&dx) && (16..88).contains(&dy) && self.z == last_region.z
    }

    /// Signed delta `other - self`
    pub fn delta(&self, other: &Position) -> (i32, i32) {
        (
            other.x as i32 - self.x as i32,
            other.y as i32 - self.y as i32,
        )
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Walking direction, using the client's direction ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    NorthWest = 0,
    North = 1,
    NorthEast = 2,
    West = 3,
    East = 4,
    SouthWest = 5,
    South = 6,
    SouthEast = 7,
}

impl Direction {
    /// Direction of a single-tile step, if it is one
    pub fn between(from: &Position, to: &Position) -> Option<Self> {
        match from.delta(to) {
            (-1, 1) => Some(Self::NorthWest),
            (0, 1) => Some(Self::North),
            (1, 1) => Some(Self::NorthEast),
            (-1, 0) => Some(Self::West),
            (1, 0) => Some(Self::East),
            (-1, -1) => Some(Self::SouthWest),
            (0, -1) => Some(Self::South),
            (1, -1) => Some(Self::SouthEast),
            _ => None,
        }
    }

    /// Client direction id
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Which side of the player/NPC split a mob is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MobKind {
    Player,
    Npc,
}

/// Hit splat type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitType {
    /// Blue zero splat
    Blocked,
    /// Red damage splat
    #[default]
    Normal,
    /// Green poison splat
    Poison,
    /// Orange disease splat
    Disease,
}

impl HitType {
    /// Wire opcode for the splat
    pub fn opcode(self) -> u8 {
        match self {
            HitType::Blocked => 0,
            HitType::Normal => 1,
            HitType::Poison => 2,
            HitType::Disease => 3,
        }
    }
}

/// A damage event attached to a mob for this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Damage dealt
    pub damage: u8,
    /// Splat type
    pub hit_type: HitType,
}

impl Hit {
    /// Create a hit; zero damage always shows as blocked
    pub fn new(damage: u8, hit_type: HitType) -> Self {
        let hit_type = if damage == 0 { HitType::Blocked } else { hit_type };
        Self { damage, hit_type }
    }
}

/// Public chat message, already packed by the chat codec collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    /// Packed message text
    pub message: Vec<u8>,
    /// Text colour id
    pub color: u8,
    /// Text effect id
    pub effects: u8,
}

impl Chat {
    /// Create a chat payload
    pub fn new(message: Vec<u8>, color: u8, effects: u8) -> Self {
        Self {
            message,
            color,
            effects,
        }
    }
}

/// Forced walk between two tiles over a client-side duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceMovement {
    /// Starting tile
    pub start: Position,
    /// Destination tile
    pub end: Position,
    /// Client cycles before the move starts
    pub start_delay: u16,
    /// Client cycles until the move completes
    pub end_delay: u16,
    /// Facing direction during the move
    pub direction: Direction,
}

/// Animation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Animation {
    /// Animation id (65535 resets)
    pub id: u16,
    /// Client cycles before playing
    pub delay: u8,
}

impl Animation {
    /// Create an animation
    pub fn new(id: u16, delay: u8) -> Self {
        Self { id, delay }
    }

    /// Stop the current animation
    pub fn reset() -> Self {
        Self { id: 65535, delay: 0 }
    }
}

/// Graphic (spot animation) request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Graphic {
    /// Graphic id
    pub id: u16,
    /// Height above ground
    pub height: u16,
    /// Client cycles before playing
    pub delay: u16,
}

impl Graphic {
    /// Create a graphic
    pub fn new(id: u16, height: u16, delay: u16) -> Self {
        Self { id, height, delay }
    }
}

/// Mob being faced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionTarget {
    /// Face a player
    Player(u16),
    /// Face an NPC
    Npc(u16),
    /// Stop facing anything
    Reset,
}

impl InteractionTarget {
    /// Client encoding: players are offset by 32768
    pub fn wire_index(self) -> u16 {
        match self {
            InteractionTarget::Player(index) => index.wrapping_add(32768),
            InteractionTarget::Npc(index) => index,
            InteractionTarget::Reset => 65535,
        }
    }
}

/// Current and base hitpoints, read by the hit encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hitpoints {
    /// Current level
    pub current: u8,
    /// Static (maximum) level
    pub max: u8,
}

/// Dirty flags plus the payloads backing them, reset every tick
#[derive(Debug, Clone, Default)]
pub struct MobUpdates {
    /// What changed this tick
    pub flags: UpdateFlagSet,
    /// Public chat
    pub chat: Option<Chat>,
    /// Overhead text
    pub forced_chat: Option<String>,
    /// Primary hit splat
    pub primary_hit: Option<Hit>,
    /// Secondary hit splat
    pub secondary_hit: Option<Hit>,
    /// Forced movement
    pub force_movement: Option<ForceMovement>,
    /// Animation
    pub animation: Option<Animation>,
    /// Graphic
    pub graphic: Option<Graphic>,
    /// Facing target
    pub interaction: Option<InteractionTarget>,
    /// Tile to face
    pub face_position: Option<Position>,
    /// NPC transform id
    pub transform: Option<u16>,
}

impl MobUpdates {
    /// Create empty update state
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a flag that has no payload (appearance, region)
    pub fn flag(&mut self, flag: UpdateFlag) {
        self.flags.flag(flag);
    }

    /// Attach a chat message
    pub fn chat(&mut self, chat: Chat) {
        self.chat = Some(chat);
        self.flags.flag(UpdateFlag::Chat);
    }

    /// Attach overhead text
    pub fn forced_chat(&mut self, text: impl Into<String>) {
        self.forced_chat = Some(text.into());
        self.flags.flag(UpdateFlag::ForcedChat);
    }

    /// Attach the primary hit
    pub fn primary_hit(&mut self, hit: Hit) {
        self.primary_hit = Some(hit);
        self.flags.flag(UpdateFlag::PrimaryHit);
    }

    /// Attach the secondary hit
    pub fn secondary_hit(&mut self, hit: Hit) {
        self.secondary_hit = Some(hit);
        self.flags.flag(UpdateFlag::SecondaryHit);
    }

    /// Attach a forced movement
    pub fn force_movement(&mut self, movement: ForceMovement) {
        self.force_movement = Some(movement);
        self.flags.flag(UpdateFlag::ForceMovement);
    }

    /// Attach an animation
    pub fn animation(&mut self, animation: Animation) {
        self.animation = Some(animation);
        self.flags.flag(UpdateFlag::Animation);
    }

    /// Attach a graphic
    pub fn graphic(&mut self, graphic: Graphic) {
        self.graphic = Some(graphic);
        self.flags.flag(UpdateFlag::Graphic);
    }

    /// Face a mob
    pub fn interact(&mut self, target: InteractionTarget) {
        self.interaction = Some(target);
        self.flags.flag(UpdateFlag::Interaction);
    }

    /// Face a tile
    pub fn face(&mut self, position: Position) {
        self.face_position = Some(position);
        self.flags.flag(UpdateFlag::FacePosition);
    }

    /// Transform an NPC into another definition
    pub fn transform(&mut self, id: u16) {
        self.transform = Some(id);
        self.flags.flag(UpdateFlag::Transform);
    }

    /// Clear flags and drop every payload
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Capabilities shared by players and NPCs
pub trait Mob {
    /// Registry slot
    fn index(&self) -> u16;

    /// Player or NPC
    fn kind(&self) -> MobKind;

    /// Current position
    fn position(&self) -> Position;

    /// Tile footprint
    fn size(&self) -> u8;

    /// Hitpoints for hit splats
    fn hitpoints(&self) -> Hitpoints;

    /// This tick's flags and payloads
    fn updates(&self) -> &RwLock<MobUpdates>;

    /// Mark a flag without payload
    fn flag(&self, flag: UpdateFlag) {
        self.updates().write().flag(flag);
    }

    /// Tick-end reset of flags and transient payloads
    fn reset_updates(&self) {
        self.updates().write().reset();
    }
}

/// Borrowed mob, the closed set the block encoders dispatch on
#[derive(Debug, Clone, Copy)]
pub enum MobRef<'a> {
    Player(&'a Player),
    Npc(&'a Npc),
}

impl<'a> MobRef<'a> {
    /// The mob behind the reference
    pub fn as_mob(&self) -> &'a dyn Mob {
        match *self {
            MobRef::Player(player) => player,
            MobRef::Npc(npc) => npc,
        }
    }

    /// Registry slot
    pub fn index(&self) -> u16 {
        self.as_mob().index()
    }

    /// Player or NPC
    pub fn kind(&self) -> MobKind {
        self.as_mob().kind()
    }

    /// Lock this tick's updates for reading
    pub fn updates(&self) -> RwLockReadGuard<'a, MobUpdates> {
        self.as_mob().updates().read()
    }
}
