//! # Decoder Device Context
//!
//! One [`Device`] per attached decoder. It owns the register window, the
//! collaborators, both ring channels and the state shared between the
//! submission path and the interrupt handler.
//!
//! ## Locking
//!
//! The busy flag, command queue, reset state and firmware flags live under
//! a single spin lock, held only for short non-blocking sections and never
//! across a ring access. The ring itself is protected by the busy flag:
//! only the context that moved it from idle to busy writes to the
//! host->firmware ring. Fence values are atomics outside the lock.
//!
//! The lock is shared with the interrupt handler, so it is only taken
//! through [`Platform::irq_save`]: the decoder interrupt stays masked on
//! the holding CPU until the guard drops.

use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, MutexGuard};

use vxd_core::{DeviceConfig, Result, Seqno};
use vxd_hal::RegisterIo;
use vxd_rpc::RingChannel;

use crate::fence::{FailureReason, FenceTracker};
use crate::mmu::MmuContext;
use crate::platform::{FenceRegistry, Platform};
use crate::queue::{CommandQueue, PendingCommand};
use crate::recovery::NeedsReset;

// =============================================================================
// DEVICE STATE
// =============================================================================

/// State guarded by the device lock
#[derive(Debug)]
pub(crate) struct DeviceState {
    /// A command buffer is on the ring or being written to it
    pub(crate) busy: bool,
    /// Commands waiting for the decoder
    pub(crate) queue: CommandQueue,
    /// Recovery owed before the next submission
    pub(crate) needs_reset: NeedsReset,
    /// Firmware image is resident
    pub(crate) fw_loaded: bool,
    /// Firmware reported a fault since the last reset
    pub(crate) fw_error: bool,
    /// Local RAM saved for power-down, restored after the next reset
    pub(crate) saved_context: Option<Vec<u32>>,
}

/// Device lock held with the decoder interrupt masked
pub(crate) struct StateGuard<'a, P: Platform> {
    state: ManuallyDrop<MutexGuard<'a, DeviceState>>,
    platform: &'a P,
    was_enabled: bool,
}

impl<P: Platform> Deref for StateGuard<'_, P> {
    type Target = DeviceState;

    fn deref(&self) -> &DeviceState {
        &self.state
    }
}

impl<P: Platform> DerefMut for StateGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }
}

impl<P: Platform> Drop for StateGuard<'_, P> {
    fn drop(&mut self) {
        // Unlock before unmasking
        // SAFETY: `state` is dropped exactly once, here, and not used after
        unsafe { ManuallyDrop::drop(&mut self.state) };
        self.platform.irq_restore(self.was_enabled);
    }
}

/// Snapshot of the device for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStatus {
    /// Decoder busy
    pub busy: bool,
    /// Commands queued
    pub queued: usize,
    /// Recovery pending
    pub needs_reset: NeedsReset,
    /// Firmware resident
    pub fw_loaded: bool,
    /// Firmware fault seen since the last reset
    pub fw_error: bool,
    /// Highest fence handed to the decoder
    pub last_submitted: Seqno,
    /// Last fence the firmware completed
    pub last_completed: Seqno,
    /// Interrupt drains cut short by an untrusted message
    pub protocol_errors: u64,
}

// =============================================================================
// DEVICE
// =============================================================================

/// An attached video decoder
#[derive(Debug)]
pub struct Device<R, P, F> {
    pub(crate) config: DeviceConfig,
    pub(crate) io: R,
    pub(crate) platform: P,
    pub(crate) fences: F,
    pub(crate) mmu: MmuContext,
    pub(crate) tracker: FenceTracker,
    pub(crate) to_firmware: RingChannel,
    pub(crate) to_host: RingChannel,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) protocol_errors: AtomicU64,
}

impl<R, P, F> Device<R, P, F>
where
    R: RegisterIo,
    P: Platform,
    F: FenceRegistry,
{
    /// Attach to a decoder
    ///
    /// The firmware is not loaded yet; the first submission uploads it.
    pub fn attach(config: DeviceConfig, io: R, platform: P, fences: F) -> Result<Self> {
        config.validate()?;
        log::info!(
            "VXD: attaching {:?} decoder ({:?} firmware, {:?})",
            config.revision,
            config.abi,
            config.power_policy
        );

        Ok(Self {
            state: Mutex::new(DeviceState {
                busy: false,
                queue: CommandQueue::new(config.max_queue_depth),
                needs_reset: NeedsReset::None,
                fw_loaded: false,
                fw_error: false,
                saved_context: None,
            }),
            config,
            io,
            platform,
            fences,
            mmu: MmuContext::new(0),
            tracker: FenceTracker::new(),
            to_firmware: RingChannel::to_firmware(),
            to_host: RingChannel::to_host(),
            protocol_errors: AtomicU64::new(0),
        })
    }

    /// Detach, failing every command still queued
    pub fn detach(self) -> (R, P, F) {
        let dropped = self.flush_queue(FailureReason::Detached);
        log::info!("VXD: detached ({} queued commands dropped)", dropped);
        (self.io, self.platform, self.fences)
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// MMU state shared with the page-table code
    pub fn mmu(&self) -> &MmuContext {
        &self.mmu
    }

    /// Submitted and completed fence values
    pub fn tracker(&self) -> &FenceTracker {
        &self.tracker
    }

    /// Fence waiter registry
    pub fn registry(&self) -> &F {
        &self.fences
    }

    /// Platform services
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Host->firmware ring
    pub fn to_firmware(&self) -> &RingChannel {
        &self.to_firmware
    }

    /// Firmware->host ring
    pub fn to_host(&self) -> &RingChannel {
        &self.to_host
    }

    /// Register window
    pub fn io(&self) -> &R {
        &self.io
    }

    /// Take a diagnostic snapshot
    pub fn decode_status(&self) -> DecodeStatus {
        let state = self.lock_state();
        DecodeStatus {
            busy: state.busy,
            queued: state.queue.len(),
            needs_reset: state.needs_reset,
            fw_loaded: state.fw_loaded,
            fw_error: state.fw_error,
            last_submitted: self.tracker.last_submitted(),
            last_completed: self.tracker.last_completed(),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }

    /// Take the device lock with the decoder interrupt masked
    pub(crate) fn lock_state(&self) -> StateGuard<'_, P> {
        let was_enabled = self.platform.irq_save();
        StateGuard {
            state: ManuallyDrop::new(self.state.lock()),
            platform: &self.platform,
            was_enabled,
        }
    }

    /// Fail every queued command with `reason`, returning how many
    pub(crate) fn flush_queue(&self, reason: FailureReason) -> usize {
        let flushed = self.lock_state().queue.take_all();
        self.fail_all(flushed, reason, None)
    }

    /// Give up on everything the decoder owes
    ///
    /// Records `needs_reset`, drops the busy flag and fails every queued
    /// command except `spared`, which the caller has already failed. The
    /// tracker is settled under the lock, so no fence is left outstanding
    /// for the liveness check to wait on.
    pub(crate) fn abandon(&self, needs_reset: NeedsReset, spared: Option<Seqno>) -> usize {
        let flushed = {
            let mut state = self.lock_state();
            state.needs_reset.merge(needs_reset);
            state.busy = false;
            let flushed = state.queue.take_all();
            self.tracker.settle();
            flushed
        };
        self.fail_all(flushed, FailureReason::Flushed, spared)
    }

    fn fail_all(
        &self,
        flushed: impl IntoIterator<Item = PendingCommand>,
        reason: FailureReason,
        spared: Option<Seqno>,
    ) -> usize {
        let mut count = 0;
        for entry in flushed.into_iter().filter(|e| Some(e.fence) != spared) {
            log::debug!("VXD: failing queued fence {} ({})", entry.fence, reason);
            self.fences.fail(entry.fence, reason);
            count += 1;
        }
        count
    }
}
