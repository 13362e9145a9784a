//! # Fence Sequence Numbers
//!
//! The firmware carries fences in a 32-bit field, so every comparison
//! between two sequence numbers goes through wrapping arithmetic.

use core::fmt;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Half-range threshold for wraparound disambiguation
///
/// A wrapping difference above this value means the left operand is behind
/// the right one.
pub const WRAP_THRESHOLD: u32 = 0x0FFF_FFFF;

// =============================================================================
// SEQUENCE NUMBER
// =============================================================================

/// A 32-bit fence sequence number
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Seqno(u32);

impl Seqno {
    /// Sequence number zero (nothing submitted yet)
    pub const ZERO: Self = Self(0);

    /// Create from the raw hardware value
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw hardware value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Next sequence number, wrapping at 32 bits
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Wrapping difference `self - other`
    #[inline]
    pub const fn distance(self, other: Self) -> u32 {
        self.0.wrapping_sub(other.0)
    }

    /// Check if `self` is strictly behind `other` across a wrap
    #[inline]
    pub const fn is_behind(self, other: Self) -> bool {
        self.distance(other) > WRAP_THRESHOLD
    }

    /// Check if `self` has reached `other` (equal or ahead)
    #[inline]
    pub const fn has_reached(self, other: Self) -> bool {
        !self.is_behind(other)
    }
}

impl fmt::Debug for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seqno({:#010x})", self.0)
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Seqno {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Seqno> for u32 {
    fn from(seq: Seqno) -> Self {
        seq.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behind_without_wrap() {
        assert!(Seqno::new(4).is_behind(Seqno::new(5)));
        assert!(!Seqno::new(5).is_behind(Seqno::new(5)));
        assert!(!Seqno::new(6).is_behind(Seqno::new(5)));
    }

    #[test]
    fn test_behind_across_wrap() {
        let before = Seqno::new(0xFFFF_FFFE);
        let after = before.next().next().next();
        assert_eq!(after.raw(), 1);
        assert!(before.is_behind(after));
        assert!(after.has_reached(before));
    }

    #[test]
    fn test_threshold_boundary() {
        // Exactly the threshold apart still counts as "ahead"
        let a = Seqno::new(WRAP_THRESHOLD);
        assert!(!a.is_behind(Seqno::ZERO));
        assert!(Seqno::ZERO.is_behind(Seqno::new(1)));
    }
}
