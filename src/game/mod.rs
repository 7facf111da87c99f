//! Game module
//!
//! Core game-side types of the synchronization server:
//! - World management and the tick driver
//! - Players, NPCs and the shared mob model
//! - Entity synchronization (update blocks and frames)
//! - Login/logout hooks, events and persistence

pub mod event;
pub mod lifecycle;
pub mod mob;
pub mod npc;
pub mod persistence;
pub mod player;
pub mod sync;
pub mod world;
