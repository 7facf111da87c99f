//! Update flags for mob synchronization
//!
//! Tracks what aspects of a mob have changed this tick and need to be
//! reported to observers. Flags are monotonic within a tick and cleared
//! together by the owning mob's reset.

use bitflags::bitflags;

bitflags! {
    /// Raw dirty bits, one per [`UpdateFlag`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlagBits: u16 {
        /// Map region must be rebuilt
        const REGION = 1 << 0;
        /// Appearance has changed (equipment, body, colours)
        const APPEARANCE = 1 << 1;
        /// Public chat
        const CHAT = 1 << 2;
        /// Overhead text
        const FORCED_CHAT = 1 << 3;
        /// Forced movement (agility shortcuts, cutscenes)
        const FORCE_MOVEMENT = 1 << 4;
        /// Primary hit splat
        const PRIMARY_HIT = 1 << 5;
        /// Secondary hit splat
        const SECONDARY_HIT = 1 << 6;
        /// Animation is playing
        const ANIMATION = 1 << 7;
        /// Graphics/spotanim effect
        const GRAPHICS = 1 << 8;
        /// Face a mob
        const INTERACTION = 1 << 9;
        /// Face a tile
        const FACE_POSITION = 1 << 10;
        /// NPC definition swap
        const TRANSFORM = 1 << 11;
    }
}

/// A single kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateFlag {
    Region,
    Appearance,
    Chat,
    ForcedChat,
    ForceMovement,
    PrimaryHit,
    SecondaryHit,
    Animation,
    Graphic,
    Interaction,
    FacePosition,
    Transform,
}

impl UpdateFlag {
    /// Every flag kind
    pub const ALL: [UpdateFlag; 12] = [
        UpdateFlag::Region,
        UpdateFlag::Appearance,
        UpdateFlag::Chat,
        UpdateFlag::ForcedChat,
        UpdateFlag::ForceMovement,
        UpdateFlag::PrimaryHit,
        UpdateFlag::SecondaryHit,
        UpdateFlag::Animation,
        UpdateFlag::Graphic,
        UpdateFlag::Interaction,
        UpdateFlag::FacePosition,
        UpdateFlag::Transform,
    ];

    /// Bit for this flag
    pub fn bits(self) -> UpdateFlagBits {
        match self {
            UpdateFlag::Region => UpdateFlagBits::REGION,
            UpdateFlag::Appearance => UpdateFlagBits::APPEARANCE,
            UpdateFlag::Chat => UpdateFlagBits::CHAT,
            UpdateFlag::ForcedChat => UpdateFlagBits::FORCED_CHAT,
            UpdateFlag::ForceMovement => UpdateFlagBits::FORCE_MOVEMENT,
            UpdateFlag::PrimaryHit => UpdateFlagBits::PRIMARY_HIT,
            UpdateFlag::SecondaryHit => UpdateFlagBits::SECONDARY_HIT,
            UpdateFlag::Animation => UpdateFlagBits::ANIMATION,
            UpdateFlag::Graphic => UpdateFlagBits::GRAPHICS,
            UpdateFlag::Interaction => UpdateFlagBits::INTERACTION,
            UpdateFlag::FacePosition => UpdateFlagBits::FACE_POSITION,
            UpdateFlag::Transform => UpdateFlagBits::TRANSFORM,
        }
    }

    /// Upper-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            UpdateFlag::Region => "REGION",
            UpdateFlag::Appearance => "APPEARANCE",
            UpdateFlag::Chat => "CHAT",
            UpdateFlag::ForcedChat => "FORCED_CHAT",
            UpdateFlag::ForceMovement => "FORCE_MOVEMENT",
            UpdateFlag::PrimaryHit => "PRIMARY_HIT",
            UpdateFlag::SecondaryHit => "SECONDARY_HIT",
            UpdateFlag::Animation => "ANIMATION",
            UpdateFlag::Graphic => "GRAPHICS",
            UpdateFlag::Interaction => "INTERACTION",
            UpdateFlag::FacePosition => "FACE_POSITION",
            UpdateFlag::Transform => "TRANSFORM",
        }
    }
}

/// Per-mob set of dirty flags for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateFlagSet {
    bits: UpdateFlagBits,
}

impl UpdateFlagSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag; setting it again is a no-op
    pub fn flag(&mut self, flag: UpdateFlag) {
        self.bits |= flag.bits();
    }

    /// Check a single flag
    pub fn is_flagged(&self, flag: UpdateFlag) -> bool {
        self.bits.contains(flag.bits())
    }

    /// Whether anything changed this tick
    pub fn any_flagged(&self) -> bool {
        !self.bits.is_empty()
    }

    /// Reset every flag
    pub fn clear(&mut self) {
        self.bits = UpdateFlagBits::empty();
    }

    /// Raw bits
    pub fn bits(&self) -> UpdateFlagBits {
        self.bits
    }

    /// Flags currently set, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = UpdateFlag> + '_ {
        UpdateFlag::ALL
            .into_iter()
            .filter(move |flag| self.is_flagged(*flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_set_default() {
        let flags = UpdateFlagSet::default();
        assert!(!flags.any_flagged());
        assert_eq!(flags.iter().count(), 0);
    }

    #[test]
    fn test_flag_is_idempotent() {
        let mut flags = UpdateFlagSet::new();
        flags.flag(UpdateFlag::Chat);
        let once = flags;
        flags.flag(UpdateFlag::Chat);
        assert_eq!(flags, once);
        assert_eq!(flags.iter().collect::<Vec<_>>(), vec![UpdateFlag::Chat]);
    }

    #[test]
    fn test_flag_multiple() {
        let mut flags = UpdateFlagSet::new();
        flags.flag(UpdateFlag::Appearance);
        flags.flag(UpdateFlag::Region);
        assert!(flags.is_flagged(UpdateFlag::Appearance));
        assert!(flags.is_flagged(UpdateFlag::Region));
        assert!(!flags.is_flagged(UpdateFlag::Chat));
        assert_eq!(
            flags.iter().collect::<Vec<_>>(),
            vec![UpdateFlag::Region, UpdateFlag::Appearance]
        );
    }

    #[test]
    fn test_clear() {
        let mut flags = UpdateFlagSet::new();
        flags.flag(UpdateFlag::Region);
        flags.flag(UpdateFlag::PrimaryHit);
        assert!(flags.any_flagged());

        flags.clear();
        assert!(!flags.any_flagged());
    }

    #[test]
    fn test_flag_bits_are_distinct() {
        let mut seen = UpdateFlagBits::empty();
        for flag in UpdateFlag::ALL {
            assert!(!seen.intersects(flag.bits()), "{} overlaps", flag.name());
            seen |= flag.bits();
        }
    }
}
