//! Byte transforms
//!
//! The 317 protocol scrambles individual fields of otherwise identical
//! packets with one of four per-byte transforms. They carry no meaning of
//! their own; which one applies is fixed per field.
//!
//! | transform | encode            | decode            |
//! |-----------|-------------------|-------------------|
//! | Standard  | `v`               | `v`               |
//! | A         | `v + 128`         | `v - 128`         |
//! | C         | `128 - v`         | `128 - v`         |
//! | S         | `-v`              | `-v`              |
//!
//! All arithmetic is mod 256. C and S are their own inverse.

/// Per-byte transform applied to a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteTransform {
    /// No transform
    #[default]
    Standard,
    /// Add 128
    A,
    /// Subtract from 128
    C,
    /// Negate
    S,
}

impl ByteTransform {
    /// All transforms, in declaration order
    pub const ALL: [ByteTransform; 4] = [
        ByteTransform::Standard,
        ByteTransform::A,
        ByteTransform::C,
        ByteTransform::S,
    ];

    /// Encode a raw value for the wire
    #[inline]
    pub fn encode(self, value: u8) -> u8 {
        match self {
            ByteTransform::Standard => value,
            ByteTransform::A => value.wrapping_add(128),
            ByteTransform::C => 128u8.wrapping_sub(value),
            ByteTransform::S => value.wrapping_neg(),
        }
    }

    /// Recover the raw value from a wire byte
    #[inline]
    pub fn decode(self, value: u8) -> u8 {
        match self {
            ByteTransform::Standard => value,
            ByteTransform::A => value.wrapping_sub(128),
            ByteTransform::C => 128u8.wrapping_sub(value),
            ByteTransform::S => value.wrapping_neg(),
        }
    }
}

/// Byte order for multi-byte writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    Big,
    /// Least significant byte first
    Little,
}
