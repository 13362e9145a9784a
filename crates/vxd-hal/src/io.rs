//! # Register Access
//!
//! Word-granular register access is the only hardware boundary of the
//! driver core. Every read and write is a single atomic 32-bit access.

// =============================================================================
// REGISTER IO TRAIT
// =============================================================================

/// 32-bit register access at byte offsets into the decoder MMIO window
///
/// Implementations must make each call a single untorn word access; the
/// ring index registers rely on that for their single-writer protocol.
pub trait RegisterIo {
    /// Read 32-bit register
    fn read32(&self, offset: u32) -> u32;

    /// Write 32-bit register
    fn write32(&self, offset: u32, value: u32);

    /// Read-modify-write under `mask`
    fn write32_masked(&self, offset: u32, value: u32, mask: u32) {
        let current = self.read32(offset);
        self.write32(offset, (current & !mask) | (value & mask));
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

// =============================================================================
// MMIO REGION
// =============================================================================

/// Volatile MMIO window backing [`RegisterIo`] on real hardware
#[derive(Debug)]
pub struct MmioRegion {
    /// Virtual address of the window
    virt_addr: usize,
    /// Window size in bytes
    size: usize,
}

impl MmioRegion {
    /// Create a region over an already-mapped window
    ///
    /// # Safety
    /// - `virt_addr` must map `size` bytes of device registers for the
    ///   lifetime of the region
    /// - `virt_addr` must be 4-byte aligned
    pub unsafe fn new(virt_addr: usize, size: usize) -> Self {
        Self { virt_addr, size }
    }

    /// Window size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, offset: u32) -> usize {
        let offset = offset as usize;
        assert!(
            offset % 4 == 0 && offset + 4 <= self.size,
            "MMIO offset {:#x} outside window",
            offset
        );
        self.virt_addr + offset
    }
}

impl RegisterIo for MmioRegion {
    fn read32(&self, offset: u32) -> u32 {
        let addr = self.check(offset);
        // SAFETY: bounds and alignment checked, mapping guaranteed by constructor
        let value = unsafe { core::ptr::read_volatile(addr as *const u32) };
        fence::mmio_read_barrier();
        value
    }

    fn write32(&self, offset: u32, value: u32) {
        let addr = self.check(offset);
        fence::mmio_write_barrier();
        // SAFETY: bounds and alignment checked, mapping guaranteed by constructor
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}

// SAFETY: the region is a plain address range; each access is a single
// volatile word operation.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Memory barrier types for MMIO
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Memory barrier before MMIO write
    #[inline(always)]
    pub fn mmio_write_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb st", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        compiler();
    }

    /// Memory barrier after MMIO read
    #[inline(always)]
    pub fn mmio_read_barrier() {
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb ld", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(target_arch = "aarch64"))]
        compiler();
    }
}
