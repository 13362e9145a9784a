//! # Register Map
//!
//! Byte offsets of the decoder registers inside its MMIO window.
//!
//! The host/firmware communication area lives in the local RAM window at
//! [`LOCAL_RAM_BASE`]; ring buffers are addressed relative to that base.

use static_assertions::const_assert;

// =============================================================================
// MTX CONTROL
// =============================================================================

/// MTX (embedded controller) enable
pub const MTX_ENABLE: u32 = 0x0000;
/// MTX doorbell: write 1 to signal a new host->firmware message
pub const MTX_KICK: u32 = 0x0080;

// =============================================================================
// CORE CONTROL
// =============================================================================

/// Interrupt status
pub const INTERRUPT_STATUS: u32 = 0x0608;
/// Interrupt clear (write 1 to clear)
pub const INTERRUPT_CLEAR: u32 = 0x060C;
/// Manual clock enable
pub const MAN_CLK_ENABLE: u32 = 0x0620;
/// MMU control 0
pub const MMU_CONTROL0: u32 = 0x0680;

/// All decoder clocks enabled
pub const CLK_ENABLE_ALL: u32 = 0x0000_0777;
/// MMU_CONTROL0: pause MMU translation
pub const MMU_CONTROL0_PAUSE: u32 = 1 << 1;

/// Legacy hardware clears every interrupt source with this mask
pub const INTERRUPT_CLEAR_ALL: u32 = 0xFFFF;

// =============================================================================
// LOCAL RAM / COMMS AREA
// =============================================================================

/// Local RAM window base; ring offsets are relative to this
pub const LOCAL_RAM_BASE: u32 = 0x2000;
/// Local RAM window size in bytes (saved across power-down)
pub const LOCAL_RAM_SIZE: u32 = 0x1000;

/// Communication area inside local RAM
pub const COMMS_AREA: u32 = LOCAL_RAM_BASE + 0x0FE0;

/// Firmware status word
pub const COMMS_FW_STATUS: u32 = COMMS_AREA - 0x10;
/// Firmware signature word
pub const COMMS_SIGNATURE: u32 = COMMS_AREA;

/// Firmware->host ring geometry (low 16: words, high 16: byte offset)
pub const COMMS_TO_HOST_BUF_SIZE: u32 = COMMS_AREA + 0x04;
/// Firmware->host read index (host writes)
pub const COMMS_TO_HOST_RD_INDEX: u32 = COMMS_AREA + 0x08;
/// Firmware->host write index (firmware writes)
pub const COMMS_TO_HOST_WRT_INDEX: u32 = COMMS_AREA + 0x0C;
/// Host->firmware ring geometry (low 16: words, high 16: byte offset)
pub const COMMS_TO_MTX_BUF_SIZE: u32 = COMMS_AREA + 0x10;
/// Host->firmware read index (firmware writes)
pub const COMMS_TO_MTX_RD_INDEX: u32 = COMMS_AREA + 0x14;
/// Host->firmware write index (host writes)
pub const COMMS_TO_MTX_WRT_INDEX: u32 = COMMS_AREA + 0x1C;

/// FW_STATUS: hardware idle
pub const FW_STATUS_HW_IDLE: u32 = 1 << 0;

const_assert!(COMMS_FW_STATUS >= LOCAL_RAM_BASE);
const_assert!(COMMS_TO_MTX_WRT_INDEX < LOCAL_RAM_BASE + LOCAL_RAM_SIZE);

// =============================================================================
// RING GEOMETRY
// =============================================================================

/// Decoded contents of a ring `BUF_SIZE` register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    /// Capacity in 32-bit words
    pub capacity_words: u32,
    /// Absolute register offset of word 0
    pub base: u32,
}

impl RingGeometry {
    /// Decode from a `BUF_SIZE` register value
    pub const fn decode(value: u32) -> Self {
        Self {
            capacity_words: value & 0xFFFF,
            base: (value >> 16) + LOCAL_RAM_BASE,
        }
    }

    /// Encode for a `BUF_SIZE` register, given the offset inside local RAM
    pub const fn encode(capacity_words: u32, ram_offset: u32) -> u32 {
        (ram_offset << 16) | (capacity_words & 0xFFFF)
    }

    /// Register offset of ring word `index`
    #[inline]
    pub const fn word_offset(&self, index: u32) -> u32 {
        self.base + (index << 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_roundtrip() {
        let raw = RingGeometry::encode(64, 0x0800);
        let geom = RingGeometry::decode(raw);
        assert_eq!(geom.capacity_words, 64);
        assert_eq!(geom.base, 0x2800);
        assert_eq!(geom.word_offset(3), 0x280C);
    }
}
