//! Shared block cache
//!
//! Assembled update blocks are encoded once per mob per tick and then
//! appended into every observer's frame without copying. Blocks live in a
//! [`BlockArena`] and are addressed by generation-checked [`BlockHandle`]s.
//! Each mob owns one [`CachedBlockSlot`]; assigning into the slot is the
//! only way a block gains or loses a reference.

use bytes::Bytes;

use crate::error::{GameError, Result};

/// Handle to a block in the arena
///
/// A handle outlives its block: once the block is freed the slot's
/// generation moves on and the handle no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct CachedBlock {
    bytes: Bytes,
    refs: u32,
}

#[derive(Debug, Default)]
struct ArenaEntry {
    generation: u32,
    block: Option<CachedBlock>,
}

/// Storage for assembled blocks
#[derive(Debug, Default)]
pub struct BlockArena {
    entries: Vec<ArenaEntry>,
    free: Vec<u32>,
}

impl BlockArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly assembled block with no references
    ///
    /// The caller must hand the handle to [`CachedBlockSlot::set`] before
    /// the tick ends, otherwise the block is only reclaimed by
    /// [`BlockArena::sweep`].
    pub fn insert(&mut self, bytes: Bytes) -> BlockHandle {
        let block = Some(CachedBlock { bytes, refs: 0 });
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.block = block;
                BlockHandle {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(ArenaEntry {
                    generation: 0,
                    block,
                });
                BlockHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn entry(&self, handle: BlockHandle) -> Option<&CachedBlock> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.block.as_ref())
    }

    fn entry_mut(&mut self, handle: BlockHandle) -> Option<&mut CachedBlock> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.block.as_mut())
    }

    /// Read a live block; `None` once it has been freed
    pub fn get(&self, handle: BlockHandle) -> Option<&Bytes> {
        self.entry(handle).map(|block| &block.bytes)
    }

    /// Whether the handle still resolves
    pub fn contains(&self, handle: BlockHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Current reference count, 0 for a stale handle
    pub fn ref_count(&self, handle: BlockHandle) -> u32 {
        self.entry(handle).map_or(0, |block| block.refs)
    }

    /// Number of blocks still allocated
    pub fn live_blocks(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.block.is_some())
            .count()
    }

    fn retain(&mut self, handle: BlockHandle) -> Result<()> {
        let block = self.entry_mut(handle).ok_or(GameError::StaleBlock)?;
        block.refs += 1;
        Ok(())
    }

    /// Drop one reference, freeing the block at zero. Returns whether the
    /// block was freed.
    fn release(&mut self, handle: BlockHandle) -> Result<bool> {
        let block = self.entry_mut(handle).ok_or(GameError::StaleBlock)?;
        block.refs = block.refs.saturating_sub(1);
        if block.refs > 0 {
            return Ok(false);
        }
        self.free_entry(handle.index);
        Ok(true)
    }

    fn free_entry(&mut self, index: u32) {
        let entry = &mut self.entries[index as usize];
        entry.block = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
    }

    /// Free every block that was inserted but never assigned to a slot
    pub fn sweep(&mut self) -> usize {
        let orphans: Vec<u32> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry.block, Some(CachedBlock { refs: 0, .. })))
            .map(|(index, _)| index as u32)
            .collect();
        for index in &orphans {
            self.free_entry(*index);
        }
        orphans.len()
    }
}

/// A mob's "current cached block"
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CachedBlockSlot {
    handle: Option<BlockHandle>,
}

impl CachedBlockSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held block
    ///
    /// Releases the previous block (freeing it if this was the last
    /// reference), then retains `block`. Passing `None` clears the slot
    /// through the same path. A stale `block` is rejected before anything
    /// is released, leaving the slot as it was.
    pub fn set(&mut self, arena: &mut BlockArena, block: Option<BlockHandle>) -> Result<()> {
        if block == self.handle {
            return Ok(());
        }
        if let Some(new) = block {
            if !arena.contains(new) {
                return Err(GameError::StaleBlock.into());
            }
        }
        if let Some(old) = self.handle.take() {
            arena.release(old)?;
        }
        if let Some(new) = block {
            arena.retain(new)?;
        }
        self.handle = block;
        Ok(())
    }

    /// The held handle, if any
    pub fn get(&self) -> Option<BlockHandle> {
        self.handle
    }

    /// Whether a block is held
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }
}
