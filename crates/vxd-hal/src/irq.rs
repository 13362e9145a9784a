//! # Interrupt Status
//!
//! Decoder interrupt sources as reported by [`regs::INTERRUPT_STATUS`].
//!
//! [`regs::INTERRUPT_STATUS`]: crate::regs::INTERRUPT_STATUS

use crate::io::RegisterIo;
use crate::regs;

bitflags::bitflags! {
    /// Decoder interrupt sources
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptStatus: u32 {
        /// MMU page fault (any of the four requestors)
        const MMU_FAULT = 0x0000_0F00;
        /// MTX posted a message on the firmware->host ring
        const MTX = 1 << 14;
    }
}

impl InterruptStatus {
    /// Read and decode the status register
    pub fn read<R: RegisterIo + ?Sized>(io: &R) -> Self {
        Self::from_bits_truncate(io.read32(regs::INTERRUPT_STATUS))
    }

    /// Check if any MMU fault requestor is flagged
    pub fn has_mmu_fault(&self) -> bool {
        self.intersects(Self::MMU_FAULT)
    }

    /// Clear `bits` and read back the clear register to post the write
    pub fn clear<R: RegisterIo + ?Sized>(io: &R, bits: u32) {
        io.write32(regs::INTERRUPT_CLEAR, bits);
        let _ = io.read32(regs::INTERRUPT_CLEAR);
    }
}
