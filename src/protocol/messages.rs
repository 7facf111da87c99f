//! Outbound game messages
//!
//! Thin writers for the messages the sync layer itself emits: the login
//! setup sequence, logout, region rebuilds and the two update frames.
//! Everything else a full game server sends is a collaborator concern.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::game::mob::Position;
use crate::net::buffer::{PacketBuffer, MAX_PACKET_SIZE};
use crate::net::codec::{ByteOrder, ByteTransform};

/// Outgoing packet opcodes (server -> client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutgoingOpcode {
    /// Player update frame
    PlayerUpdate = 81,
    /// NPC update frame
    NpcUpdate = 65,
    /// Map region rebuild
    Region = 73,
    /// Player index and membership assignment
    Assignment = 249,
    /// Sidebar tab interface
    TabWidget = 71,
    /// Open an interface
    Interface = 97,
    /// Close all interfaces
    CloseWindows = 219,
    /// Chatbox game message
    GameMessage = 253,
    /// Logout
    Logout = 109,
}

impl OutgoingOpcode {
    /// Get the opcode value
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// How a packet's length is framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSize {
    /// Length known to both sides
    Fixed,
    /// One length byte after the opcode
    VariableByte,
    /// Two length bytes after the opcode
    VariableShort,
}

/// Outgoing game packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingGamePacket {
    /// Packet opcode
    pub opcode: u8,
    /// Packet payload
    pub data: Bytes,
    /// Length framing
    pub size: PacketSize,
}

impl OutgoingGamePacket {
    /// Create a fixed-length packet
    pub fn fixed(opcode: OutgoingOpcode, data: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.as_u8(),
            data: data.into(),
            size: PacketSize::Fixed,
        }
    }

    /// Create a variable-byte length packet
    pub fn variable(opcode: OutgoingOpcode, data: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.as_u8(),
            data: data.into(),
            size: PacketSize::VariableByte,
        }
    }

    /// Create a variable-short length packet
    pub fn variable_short(opcode: OutgoingOpcode, data: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.as_u8(),
            data: data.into(),
            size: PacketSize::VariableShort,
        }
    }

    /// Encode opcode, length header and payload
    ///
    /// Opcode encryption happens in the transport layer, below this codec.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let max = match self.size {
            PacketSize::Fixed => MAX_PACKET_SIZE,
            PacketSize::VariableByte => u8::MAX as usize,
            PacketSize::VariableShort => MAX_PACKET_SIZE,
        };
        if self.data.len() > max {
            return Err(ProtocolError::PacketTooLarge {
                size: self.data.len(),
                max,
            }
            .into());
        }

        let mut buffer = PacketBuffer::with_capacity(3 + self.data.len());
        buffer.write_ubyte(self.opcode);
        match self.size {
            PacketSize::Fixed => {}
            PacketSize::VariableByte => buffer.write_ubyte(self.data.len() as u8),
            PacketSize::VariableShort => buffer.write_ushort(self.data.len() as u16),
        }
        buffer.write_bytes(&self.data);
        Ok(buffer.as_bytes().to_vec())
    }
}

/// Build the index assignment message sent first on login
pub fn build_assignment(index: u16, member: bool) -> OutgoingGamePacket {
    let mut buffer = PacketBuffer::with_capacity(3);
    buffer.write_byte_transformed(member as u8, ByteTransform::A);
    buffer.write_short_ordered(index, ByteOrder::Little, ByteTransform::A);
    OutgoingGamePacket::fixed(OutgoingOpcode::Assignment, buffer.freeze())
}

/// Build a sidebar tab widget message
pub fn build_tab_widget(tab: u8, widget: u16) -> OutgoingGamePacket {
    let mut buffer = PacketBuffer::with_capacity(3);
    buffer.write_ushort(widget);
    buffer.write_byte_a(tab);
    OutgoingGamePacket::fixed(OutgoingOpcode::TabWidget, buffer.freeze())
}

/// Build an open interface message
pub fn build_interface(id: u16) -> OutgoingGamePacket {
    let mut buffer = PacketBuffer::with_capacity(2);
    buffer.write_ushort(id);
    OutgoingGamePacket::fixed(OutgoingOpcode::Interface, buffer.freeze())
}

/// Build a close windows message
pub fn build_close_windows() -> OutgoingGamePacket {
    OutgoingGamePacket::fixed(OutgoingOpcode::CloseWindows, Bytes::new())
}

/// Build a chatbox game message
pub fn build_game_message(text: &str) -> OutgoingGamePacket {
    let mut buffer = PacketBuffer::with_capacity(text.len() + 1);
    buffer.write_string(text);
    OutgoingGamePacket::variable(OutgoingOpcode::GameMessage, buffer.freeze())
}

/// Build a logout message
pub fn build_logout() -> OutgoingGamePacket {
    OutgoingGamePacket::fixed(OutgoingOpcode::Logout, Bytes::new())
}

/// Build a region rebuild message centred on `position`
pub fn build_region(position: Position) -> OutgoingGamePacket {
    let mut buffer = PacketBuffer::with_capacity(4);
    buffer.write_short_a(position.central_region_x());
    buffer.write_ushort(position.central_region_y());
    OutgoingGamePacket::fixed(OutgoingOpcode::Region, buffer.freeze())
}
