//! Protocol module
//!
//! Outgoing game messages and their length framing.

pub mod messages;
