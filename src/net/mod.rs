//! Networking module
//!
//! Wire-level building blocks shared by every outgoing message:
//! - Packet buffers with byte and bit access
//! - The byte transforms and orders the 317 protocol uses
//! - Sessions and their connection lifecycle
//!
//! Socket I/O lives outside this crate; a session only sees a channel.

pub mod buffer;
pub mod codec;
pub mod session;
