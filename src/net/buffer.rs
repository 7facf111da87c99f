//! Packet buffer implementation
//!
//! Provides a byte buffer with 317-protocol write operations including:
//! - Standard integer types (byte, short, int, long)
//! - Byte order and per-byte transforms (see [`ByteTransform`])
//! - Bit access mode for the update envelopes
//! - Newline-terminated strings
//!
//! The client-side decoder is not modelled; [`PacketBuffer::peek_bits`] is
//! enough to inspect finished frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::net::codec::{ByteOrder, ByteTransform};

/// Maximum packet size (64KB)
pub const MAX_PACKET_SIZE: usize = 65535;

/// String terminator used by the 317 client
pub const STRING_TERMINATOR: u8 = 10;

/// Bit masks indexed by bit count
const BIT_MASKS: [u32; 33] = {
    let mut masks = [0u32; 33];
    let mut i = 1;
    while i < 33 {
        masks[i] = if i == 32 { u32::MAX } else { (1u32 << i) - 1 };
        i += 1;
    }
    masks
};

/// Packet buffer for building game protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Bit access position (in bits)
    bit_pos: usize,
    /// Whether currently in bit access mode
    in_bit_mode: bool,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            ..Self::default()
        }
    }

    // ============ Properties ============

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes into an immutable, cheaply clonable buffer
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Clear the buffer and reset positions
    pub fn clear(&mut self) {
        self.data.clear();
        self.bit_pos = 0;
        self.in_bit_mode = false;
    }

    // ============ Writing ============

    /// Write an unsigned byte
    #[inline]
    pub fn write_ubyte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write a signed byte
    #[inline]
    pub fn write_byte(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    /// Write a byte with a transform applied
    #[inline]
    pub fn write_byte_transformed(&mut self, value: u8, transform: ByteTransform) {
        self.data.put_u8(transform.encode(value));
    }

    /// Write byte A (value + 128)
    pub fn write_byte_a(&mut self, value: u8) {
        self.write_byte_transformed(value, ByteTransform::A);
    }

    /// Write byte C (128 - value)
    pub fn write_byte_c(&mut self, value: u8) {
        self.write_byte_transformed(value, ByteTransform::C);
    }

    /// Write byte S (negated)
    pub fn write_byte_s(&mut self, value: u8) {
        self.write_byte_transformed(value, ByteTransform::S);
    }

    /// Write a short with explicit byte order; the transform applies to the
    /// low byte only
    pub fn write_short_ordered(&mut self, value: u16, order: ByteOrder, transform: ByteTransform) {
        let high = (value >> 8) as u8;
        let low = transform.encode(value as u8);
        match order {
            ByteOrder::Big => {
                self.data.put_u8(high);
                self.data.put_u8(low);
            }
            ByteOrder::Little => {
                self.data.put_u8(low);
                self.data.put_u8(high);
            }
        }
    }

    /// Write an unsigned big-endian short
    pub fn write_ushort(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    /// Write an unsigned little-endian short
    pub fn write_ushort_le(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    /// Write short A (big-endian, A on the low byte)
    pub fn write_short_a(&mut self, value: u16) {
        self.write_short_ordered(value, ByteOrder::Big, ByteTransform::A);
    }

    /// Write little-endian short A
    pub fn write_short_le_a(&mut self, value: u16) {
        self.write_short_ordered(value, ByteOrder::Little, ByteTransform::A);
    }

    /// Write a signed big-endian int
    pub fn write_int(&mut self, value: i32) {
        self.data.put_i32(value);
    }

    /// Write a signed big-endian long
    pub fn write_long(&mut self, value: i64) {
        self.data.put_i64(value);
    }

    /// Write a newline-terminated string
    pub fn write_string(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.write_ubyte(STRING_TERMINATOR);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write bytes in reverse order
    pub fn write_bytes_reversed(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.write_ubyte(b);
        }
    }

    /// Write bytes in reverse order, each with a transform
    pub fn write_bytes_reversed_transformed(&mut self, bytes: &[u8], transform: ByteTransform) {
        for &b in bytes.iter().rev() {
            self.write_byte_transformed(b, transform);
        }
    }

    // ============ Bit Access ============

    /// Enter bit access mode, starting at the current end of the buffer
    pub fn start_bit_access(&mut self) {
        self.bit_pos = self.data.len() * 8;
        self.in_bit_mode = true;
    }

    /// Exit bit access mode, padding to the next byte boundary
    pub fn end_bit_access(&mut self) {
        let byte_len = (self.bit_pos + 7) / 8;
        while self.data.len() < byte_len {
            self.data.put_u8(0);
        }
        self.in_bit_mode = false;
    }

    /// Whether bit access mode is active
    pub fn in_bit_mode(&self) -> bool {
        self.in_bit_mode
    }

    /// Write `count` bits of `value`, most significant first
    pub fn write_bits(&mut self, count: usize, value: u32) -> Result<()> {
        debug_assert!(self.in_bit_mode, "write_bits outside bit access");
        if count == 0 || count > 32 || (count < 32 && value > BIT_MASKS[count]) {
            return Err(ProtocolError::BitOverflow { value, bits: count }.into());
        }

        let mut byte_pos = self.bit_pos >> 3;
        let mut bit_offset = 8 - (self.bit_pos & 7);
        let mut remaining = count;
        self.bit_pos += count;

        let needed = (self.bit_pos + 7) / 8;
        while self.data.len() < needed {
            self.data.put_u8(0);
        }

        while remaining > bit_offset {
            self.data[byte_pos] &= !(BIT_MASKS[bit_offset] as u8);
            self.data[byte_pos] |= ((value >> (remaining - bit_offset)) & BIT_MASKS[bit_offset]) as u8;
            remaining -= bit_offset;
            byte_pos += 1;
            bit_offset = 8;
        }

        if remaining == bit_offset {
            self.data[byte_pos] &= !(BIT_MASKS[bit_offset] as u8);
            self.data[byte_pos] |= (value & BIT_MASKS[bit_offset]) as u8;
        } else {
            let shift = bit_offset - remaining;
            self.data[byte_pos] &= !((BIT_MASKS[remaining] << shift) as u8);
            self.data[byte_pos] |= ((value & BIT_MASKS[remaining]) << shift) as u8;
        }

        Ok(())
    }

    /// Write a single bit flag
    pub fn write_bit(&mut self, flag: bool) -> Result<()> {
        self.write_bits(1, flag as u32)
    }

    /// Read `count` bits starting at an absolute bit position (inspection only)
    pub fn peek_bits(&self, bit_position: usize, count: usize) -> u32 {
        let mut value = 0u32;
        for i in 0..count {
            let pos = bit_position + i;
            let byte = self.data.get(pos >> 3).copied().unwrap_or(0);
            let bit = (byte >> (7 - (pos & 7))) & 1;
            value = (value << 1) | bit as u32;
        }
        value
    }
}

impl From<Vec<u8>> for PacketBuffer {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_bytes(&vec)
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transformed_bytes() {
        let mut buf = PacketBuffer::new();
        buf.write_byte_a(100);
        buf.write_byte_c(99);
        buf.write_byte_s(2);

        assert_eq!(buf.as_bytes(), &[228, 29, 254]);
    }

    #[test]
    fn test_short_orders() {
        let mut buf = PacketBuffer::new();
        buf.write_ushort(0x1234);
        buf.write_ushort_le(0x1234);
        buf.write_short_a(0x1234);
        buf.write_short_le_a(0x1234);

        assert_eq!(
            buf.as_bytes(),
            &[0x12, 0x34, 0x34, 0x12, 0x12, 0xB4, 0xB4, 0x12]
        );
    }

    #[test]
    fn test_string_terminator() {
        let mut buf = PacketBuffer::new();
        buf.write_string("hi");
        assert_eq!(buf.as_bytes(), &[b'h', b'i', STRING_TERMINATOR]);
    }

    #[test]
    fn test_bytes_reversed_transformed() {
        let mut buf = PacketBuffer::new();
        buf.write_bytes_reversed_transformed(&[1, 2, 3], ByteTransform::A);
        assert_eq!(buf.as_bytes(), &[131, 130, 129]);
    }

    #[test]
    fn test_bit_access() {
        let mut buf = PacketBuffer::new();

        buf.start_bit_access();
        buf.write_bits(1, 1).unwrap();
        buf.write_bits(5, 15).unwrap();
        buf.write_bits(11, 1234).unwrap();
        buf.end_bit_access();

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.peek_bits(0, 1), 1);
        assert_eq!(buf.peek_bits(1, 5), 15);
        assert_eq!(buf.peek_bits(6, 11), 1234);
    }

    #[test]
    fn test_bit_access_after_bytes() {
        let mut buf = PacketBuffer::new();
        buf.write_ubyte(0xFF);
        buf.start_bit_access();
        buf.write_bits(8, 2047 & 0xFF).unwrap();
        buf.end_bit_access();

        assert_eq!(buf.as_bytes(), &[0xFF, 0xFF]);
    }

    #[test]
    fn test_bit_overflow_rejected() {
        let mut buf = PacketBuffer::new();
        buf.start_bit_access();
        assert!(buf.write_bits(2, 4).is_err());
        assert!(buf.write_bits(0, 0).is_err());
        assert!(buf.write_bits(32, u32::MAX).is_ok());
    }

    #[test]
    fn test_freeze() {
        let mut buf = PacketBuffer::with_capacity(4);
        buf.write_int(0x01020304);
        let frozen = buf.freeze();
        assert_eq!(&frozen[..], &[1, 2, 3, 4]);
    }
}
