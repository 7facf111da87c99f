//! Update block assembler
//!
//! Turns a mob's dirty flags into one immutable block: a mask header
//! followed by each active block's fragment in the kind's fixed order.
//! The order never depends on which flags are set, so a given mask always
//! produces the same layout.

use bytes::Bytes;

use crate::error::Result;
use crate::game::mob::{MobKind, MobRef};
use crate::game::sync::blocks::UpdateBlock;
use crate::net::buffer::PacketBuffer;

/// Why a block is being assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblyMode {
    /// A mob already in the observer's local list; shared by every observer
    UpdateLocal,
    /// A mob entering the observer's local list; appearance is forced
    AddLocal,
    /// The observer's own player; chat is left out since the client
    /// echoes it locally
    UpdateSelf,
}

impl AssemblyMode {
    /// Whether the result is the same for every observer
    pub fn is_cacheable(self) -> bool {
        matches!(self, AssemblyMode::UpdateLocal)
    }

    fn includes(self, block: UpdateBlock, flagged: bool) -> bool {
        match (self, block) {
            (AssemblyMode::AddLocal, UpdateBlock::Appearance) => true,
            (AssemblyMode::UpdateSelf, UpdateBlock::Chat) => false,
            _ => flagged,
        }
    }
}

/// Assemble the update block for `mob`
///
/// Returns `None` when nothing in this mode needs encoding. Any variant
/// failing to encode fails the whole mob; nothing partial is returned.
pub fn assemble(mob: MobRef<'_>, mode: AssemblyMode) -> Result<Option<Bytes>> {
    let kind = mob.kind();
    let updates = mob.updates();

    let active: Vec<UpdateBlock> = UpdateBlock::order(kind)
        .iter()
        .copied()
        .filter(|block| mode.includes(*block, updates.flags.is_flagged(block.flag())))
        .collect();
    if active.is_empty() {
        return Ok(None);
    }

    let mask = active
        .iter()
        .filter_map(|block| block.mask(kind))
        .fold(0u16, |mask, bit| mask | bit);

    let mut buf = PacketBuffer::with_capacity(64);
    write_header(&mut buf, kind, mask);
    for block in active {
        block.encode(mob, &updates, &mut buf)?;
    }
    Ok(Some(buf.freeze()))
}

/// Players use one byte, or two little-endian bytes with 0x40 set once the
/// mask overflows a byte. NPC masks always fit in one byte.
fn write_header(buf: &mut PacketBuffer, kind: MobKind, mask: u16) {
    match kind {
        MobKind::Player if mask >= 0x100 => buf.write_ushort_le(mask | 0x40),
        _ => buf.write_ubyte(mask as u8),
    }
}
