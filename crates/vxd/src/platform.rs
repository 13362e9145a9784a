//! # Platform Collaborators
//!
//! Services the device context consumes but does not implement.
//!
//! ```text
//! Device
//!    │
//!    ├── Platform        (reset, firmware load/init, power, deferred work)
//!    ├── FenceRegistry   (waiters on fence values)
//!    └── CommandMapper   (client buffer handle -> host-readable bytes)
//! ```

use core::ops::DerefMut;

use vxd_core::{Result, Seqno};

use crate::fence::FailureReason;

// =============================================================================
// PLATFORM TRAIT
// =============================================================================

/// Board and power-management services
pub trait Platform {
    /// Soft-reset the decoder core
    fn reset_hardware(&self) -> Result<()>;

    /// Bring up the firmware communication area after a reset or power-up
    fn init_firmware(&self) -> Result<()>;

    /// Upload the firmware image to the embedded controller
    fn upload_firmware(&self) -> Result<()>;

    /// Power the decoder island down; the next access powers it back up
    fn power_down(&self);

    /// Queue a deferred idle check (never runs in the caller's context)
    fn schedule_idle_check(&self);

    /// Mask the decoder interrupt on the current CPU
    ///
    /// Called before the device lock is taken, so the interrupt handler can
    /// never spin on a lock held by the context it preempted. Returns
    /// whether the interrupt was unmasked before the call.
    fn irq_save(&self) -> bool;

    /// Undo one [`Platform::irq_save`]; unmask only if `was_enabled`
    fn irq_restore(&self, was_enabled: bool);
}

// =============================================================================
// FENCE REGISTRY TRAIT
// =============================================================================

/// Waiters on fence values
///
/// Implementations guard their waiter lists with their own lock; both
/// methods are called from interrupt context and must not block.
pub trait FenceRegistry {
    /// Every fence up to and including `fence` has completed
    fn signal(&self, fence: Seqno);

    /// The work behind `fence` will never complete
    fn fail(&self, fence: Seqno, reason: FailureReason);
}

// =============================================================================
// COMMAND MAPPER TRAIT
// =============================================================================

/// Maps client command buffers into host-readable memory
pub trait CommandMapper {
    /// Opaque client buffer handle
    type Handle;

    /// One mapped page; unmapped on drop
    type Mapping<'a>: DerefMut<Target = [u8]>
    where
        Self: 'a;

    /// Map page `page` of the buffer behind `handle`
    fn map_page(&self, handle: &Self::Handle, page: usize) -> Result<Self::Mapping<'_>>;
}
