//! Update block variants
//!
//! One [`UpdateBlock`] tag per kind of change. Each tag knows its mask bit
//! for players and NPCs and how to encode itself from a mob's transient
//! state. Encoders only read; they never touch the mob's flags or payloads.
//!
//! Players and NPCs share most tags but not their masks, their order or
//! every field transform, so each arm dispatches on [`MobRef`].

use crate::error::{GameError, ProtocolError, Result};
use crate::game::mob::{Mob, MobKind, MobRef, MobUpdates};
use crate::game::player::Player;
use crate::game::sync::update_flags::UpdateFlag;
use crate::net::buffer::PacketBuffer;
use crate::net::codec::{ByteOrder, ByteTransform};

/// Player movement animations: stand, turn, walk, turn 180, turn 90 cw,
/// turn 90 ccw, run
const PLAYER_MOVEMENT_ANIMATIONS: [u16; 7] = [808, 823, 819, 820, 821, 822, 824];

/// A kind of update block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateBlock {
    /// Forced walk between two tiles (player only)
    ForceMovement,
    /// Spot animation
    Graphic,
    /// Animation
    Animation,
    /// Overhead text
    ForcedChat,
    /// Public chat (player only)
    Chat,
    /// Face a mob
    Interaction,
    /// Model, colours, name and combat level (player only)
    Appearance,
    /// Face a tile
    FacePosition,
    /// First hit splat
    PrimaryHit,
    /// Second hit splat
    SecondaryHit,
    /// Definition swap (NPC only)
    Transform,
}

impl UpdateBlock {
    /// Player blocks, in the order the client reads them
    pub const PLAYER_ORDER: [UpdateBlock; 10] = [
        UpdateBlock::ForceMovement,
        UpdateBlock::Graphic,
        UpdateBlock::Animation,
        UpdateBlock::ForcedChat,
        UpdateBlock::Chat,
        UpdateBlock::Interaction,
        UpdateBlock::Appearance,
        UpdateBlock::FacePosition,
        UpdateBlock::PrimaryHit,
        UpdateBlock::SecondaryHit,
    ];

    /// NPC blocks, in the order the client reads them
    pub const NPC_ORDER: [UpdateBlock; 8] = [
        UpdateBlock::Animation,
        UpdateBlock::PrimaryHit,
        UpdateBlock::Graphic,
        UpdateBlock::Interaction,
        UpdateBlock::ForcedChat,
        UpdateBlock::SecondaryHit,
        UpdateBlock::Transform,
        UpdateBlock::FacePosition,
    ];

    /// Blocks a mob kind can carry, in wire order
    pub fn order(kind: MobKind) -> &'static [UpdateBlock] {
        match kind {
            MobKind::Player => &Self::PLAYER_ORDER,
            MobKind::Npc => &Self::NPC_ORDER,
        }
    }

    /// Flag that triggers this block
    pub fn flag(self) -> UpdateFlag {
        match self {
            UpdateBlock::ForceMovement => UpdateFlag::ForceMovement,
            UpdateBlock::Graphic => UpdateFlag::Graphic,
            UpdateBlock::Animation => UpdateFlag::Animation,
            UpdateBlock::ForcedChat => UpdateFlag::ForcedChat,
            UpdateBlock::Chat => UpdateFlag::Chat,
            UpdateBlock::Interaction => UpdateFlag::Interaction,
            UpdateBlock::Appearance => UpdateFlag::Appearance,
            UpdateBlock::FacePosition => UpdateFlag::FacePosition,
            UpdateBlock::PrimaryHit => UpdateFlag::PrimaryHit,
            UpdateBlock::SecondaryHit => UpdateFlag::SecondaryHit,
            UpdateBlock::Transform => UpdateFlag::Transform,
        }
    }

    /// Mask bit for this block, `None` if the mob kind cannot carry it
    pub fn mask(self, kind: MobKind) -> Option<u16> {
        match kind {
            MobKind::Player => match self {
                UpdateBlock::ForceMovement => Some(0x400),
                UpdateBlock::Graphic => Some(0x100),
                UpdateBlock::Animation => Some(0x8),
                UpdateBlock::ForcedChat => Some(0x4),
                UpdateBlock::Chat => Some(0x80),
                UpdateBlock::Interaction => Some(0x1),
                UpdateBlock::Appearance => Some(0x10),
                UpdateBlock::FacePosition => Some(0x2),
                UpdateBlock::PrimaryHit => Some(0x20),
                UpdateBlock::SecondaryHit => Some(0x200),
                UpdateBlock::Transform => None,
            },
            MobKind::Npc => match self {
                UpdateBlock::Animation => Some(0x10),
                UpdateBlock::PrimaryHit => Some(0x8),
                UpdateBlock::Graphic => Some(0x80),
                UpdateBlock::Interaction => Some(0x20),
                UpdateBlock::ForcedChat => Some(0x1),
                UpdateBlock::SecondaryHit => Some(0x40),
                UpdateBlock::Transform => Some(0x2),
                UpdateBlock::FacePosition => Some(0x4),
                UpdateBlock::ForceMovement | UpdateBlock::Chat | UpdateBlock::Appearance => None,
            },
        }
    }

    /// Write this block's fragment for `mob`
    ///
    /// `updates` is the mob's state for this tick. A flag whose payload is
    /// missing is an invariant violation and fails the whole mob.
    pub fn encode(self, mob: MobRef<'_>, updates: &MobUpdates, buf: &mut PacketBuffer) -> Result<()> {
        let index = mob.index();
        let missing = || GameError::MissingUpdatePayload {
            flag: self.flag().name(),
            index,
        };

        match (self, mob) {
            (UpdateBlock::ForceMovement, MobRef::Player(player)) => {
                let movement = updates.force_movement.ok_or_else(missing)?;
                let base = player.last_region().unwrap_or_else(|| player.position());
                buf.write_byte_c(movement.start.local_x(&base) as u8);
                buf.write_byte_c(movement.start.local_y(&base) as u8);
                buf.write_byte_c(movement.end.local_x(&base) as u8);
                buf.write_byte_c(movement.end.local_y(&base) as u8);
                buf.write_short_le_a(movement.start_delay);
                buf.write_short_a(movement.end_delay);
                buf.write_byte_c(movement.direction.id());
            }
            (UpdateBlock::Graphic, _) => {
                let graphic = updates.graphic.ok_or_else(missing)?;
                match mob.kind() {
                    MobKind::Player => buf.write_ushort_le(graphic.id),
                    MobKind::Npc => buf.write_ushort(graphic.id),
                }
                buf.write_int(((graphic.height as u32) << 16 | graphic.delay as u32) as i32);
            }
            (UpdateBlock::Animation, _) => {
                let animation = updates.animation.ok_or_else(missing)?;
                buf.write_ushort_le(animation.id);
                match mob.kind() {
                    MobKind::Player => buf.write_byte_s(animation.delay),
                    MobKind::Npc => buf.write_ubyte(animation.delay),
                }
            }
            (UpdateBlock::ForcedChat, _) => {
                let text = updates.forced_chat.as_deref().ok_or_else(missing)?;
                buf.write_string(text);
            }
            (UpdateBlock::Chat, MobRef::Player(player)) => {
                let chat = updates.chat.as_ref().ok_or_else(missing)?;
                if chat.message.len() > u8::MAX as usize {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "chat message of {} bytes",
                        chat.message.len()
                    ))
                    .into());
                }
                let effects = (chat.color as u16) << 8 | chat.effects as u16;
                buf.write_short_ordered(effects, ByteOrder::Little, ByteTransform::Standard);
                buf.write_ubyte(player.rights().as_u8());
                buf.write_byte_s(chat.message.len() as u8);
                buf.write_bytes_reversed(&chat.message);
            }
            (UpdateBlock::Interaction, _) => {
                let target = updates.interaction.ok_or_else(missing)?;
                match mob.kind() {
                    MobKind::Player => buf.write_ushort_le(target.wire_index()),
                    MobKind::Npc => buf.write_ushort(target.wire_index()),
                }
            }
            (UpdateBlock::Appearance, MobRef::Player(player)) => {
                encode_appearance(player, buf);
            }
            (UpdateBlock::FacePosition, _) => {
                let position = updates.face_position.ok_or_else(missing)?;
                let x = position.x.wrapping_mul(2).wrapping_add(1);
                let y = position.y.wrapping_mul(2).wrapping_add(1);
                match mob.kind() {
                    MobKind::Player => buf.write_short_le_a(x),
                    MobKind::Npc => buf.write_ushort_le(x),
                }
                buf.write_ushort_le(y);
            }
            (UpdateBlock::PrimaryHit, _) => {
                let hit = updates.primary_hit.ok_or_else(missing)?;
                let hp = mob.as_mob().hitpoints();
                match mob.kind() {
                    MobKind::Player => {
                        buf.write_ubyte(hit.damage);
                        buf.write_byte_a(hit.hit_type.opcode());
                        buf.write_byte_s(hp.current);
                        buf.write_ubyte(hp.max);
                    }
                    MobKind::Npc => {
                        buf.write_byte_a(hit.damage);
                        buf.write_byte_s(hit.hit_type.opcode());
                        buf.write_byte_a(hp.current);
                        buf.write_ubyte(hp.max);
                    }
                }
            }
            (UpdateBlock::SecondaryHit, _) => {
                let hit = updates.secondary_hit.ok_or_else(missing)?;
                let hp = mob.as_mob().hitpoints();
                match mob.kind() {
                    MobKind::Player => {
                        buf.write_ubyte(hit.damage);
                        buf.write_byte_s(hit.hit_type.opcode());
                        buf.write_ubyte(hp.current);
                        buf.write_byte_c(hp.max);
                    }
                    MobKind::Npc => {
                        buf.write_byte_c(hit.damage);
                        buf.write_byte_s(hit.hit_type.opcode());
                        buf.write_byte_c(hp.current);
                        buf.write_ubyte(hp.max);
                    }
                }
            }
            (UpdateBlock::Transform, MobRef::Npc(_)) => {
                let id = updates.transform.ok_or_else(missing)?;
                buf.write_short_le_a(id);
            }
            (block, mob) => {
                return Err(ProtocolError::MalformedPayload(format!(
                    "{:?} block on {:?} {}",
                    block,
                    mob.kind(),
                    mob.index()
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Write the length-prefixed appearance properties
fn encode_appearance(player: &Player, buf: &mut PacketBuffer) {
    let appearance = player.appearance();
    let equipment = player.equipment();
    let mut props = PacketBuffer::with_capacity(64);

    props.write_ubyte(appearance.gender);
    props.write_ubyte(0); // head icon

    for (slot, &item) in equipment.iter().enumerate() {
        if item > 0 {
            props.write_ushort(0x200 + item);
            continue;
        }
        let body = match slot {
            4 => Some(appearance.torso),
            6 => Some(appearance.arms),
            7 => Some(appearance.legs),
            8 => Some(appearance.head),
            9 => Some(appearance.hands),
            10 => Some(appearance.feet),
            11 if !appearance.is_female() => Some(appearance.beard),
            _ => None,
        };
        match body {
            Some(model) => props.write_ushort(0x100 + model),
            None => props.write_ubyte(0),
        }
    }

    for color in [
        appearance.hair_color,
        appearance.torso_color,
        appearance.legs_color,
        appearance.feet_color,
        appearance.skin_color,
    ] {
        props.write_ubyte(color);
    }
    for animation in PLAYER_MOVEMENT_ANIMATIONS {
        props.write_ushort(animation);
    }

    props.write_long(encode_name(&player.username) as i64);
    props.write_ubyte(player.combat_level());
    props.write_ushort(0); // skill level, unused outside skill worlds

    buf.write_byte_s(props.len() as u8);
    buf.write_bytes(props.as_bytes());
}

/// Pack a player name into base 37
pub fn encode_name(name: &str) -> u64 {
    let mut packed = 0u64;
    for c in name.chars().take(12) {
        packed *= 37;
        packed += match c {
            'A'..='Z' => c as u64 - 'A' as u64 + 1,
            'a'..='z' => c as u64 - 'a' as u64 + 1,
            '0'..='9' => c as u64 - '0' as u64 + 27,
            _ => 0,
        };
    }
    while packed % 37 == 0 && packed != 0 {
        packed /= 37;
    }
    packed
}
