//! # Recovery
//!
//! Faults leave a [`NeedsReset`] marker behind; the next submission pays
//! it off before touching the ring. A periodic liveness check catches the
//! case where the firmware stops answering altogether.

use alloc::vec::Vec;

use vxd_core::{Error, HwRevision, Result, WORD_SIZE};
use vxd_hal::{regs, RegisterIo};

use crate::device::Device;
use crate::fence::{FailureReason, Liveness};
use crate::platform::{FenceRegistry, Platform};

// =============================================================================
// NEEDS RESET
// =============================================================================

/// Recovery owed by the device, weakest first
///
/// Markers only ever strengthen until recovery runs; see
/// [`NeedsReset::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum NeedsReset {
    /// Healthy
    #[default]
    None,
    /// Re-initialise the firmware
    Reinit,
    /// Reset the decoder core, then re-initialise the firmware
    Generic,
    /// Power-cycle, re-upload and re-initialise the firmware
    ReuploadAndReinit,
}

impl NeedsReset {
    /// Marker a firmware fault leaves on `revision`
    pub fn for_fault(revision: HwRevision) -> Self {
        if revision.needs_full_reload() {
            Self::ReuploadAndReinit
        } else {
            Self::Generic
        }
    }

    /// Check if any recovery is owed
    pub fn is_pending(&self) -> bool {
        *self != Self::None
    }

    /// Keep the stronger of the two markers
    pub fn merge(&mut self, other: Self) {
        if other > *self {
            *self = other;
        }
    }
}

// =============================================================================
// DEVICE RECOVERY
// =============================================================================

impl<R, P, F> Device<R, P, F>
where
    R: RegisterIo,
    P: Platform,
    F: FenceRegistry,
{
    /// Pay off any pending recovery and make sure firmware is resident
    ///
    /// Runs at the start of every submission, outside the device lock.
    pub fn prepare_submission(&self) -> Result<()> {
        self.check_reset_fw();

        let pending = self.lock_state().needs_reset;
        if pending.is_pending() {
            self.recover(pending)?;
        }

        if !self.lock_state().fw_loaded {
            log::info!("VXD: uploading firmware");
            self.platform.upload_firmware().map_err(|e| {
                log::error!("VXD: firmware upload failed: {}", e);
                Error::FirmwareLoadFailed
            })?;
            self.lock_state().fw_loaded = true;
            log::info!("VXD: firmware loaded");
        }
        Ok(())
    }

    fn recover(&self, pending: NeedsReset) -> Result<()> {
        log::info!("VXD: recovering ({:?})", pending);

        if pending == NeedsReset::Generic {
            self.platform.reset_hardware().map_err(|e| {
                log::error!("VXD: reset failed: {}", e);
                Error::ResetFailed
            })?;
        }
        self.platform.init_firmware().map_err(|e| {
            log::error!("VXD: firmware init failed: {}", e);
            Error::FirmwareInitFailed
        })?;

        let (saved, stale, lost) = {
            let mut state = self.lock_state();
            state.needs_reset = NeedsReset::None;
            state.busy = false;
            state.fw_error = false;
            let lost = self
                .tracker
                .is_outstanding()
                .then(|| self.tracker.in_flight());
            self.tracker.settle();
            (state.saved_context.take(), state.queue.take_all(), lost)
        };

        // A command on the ring when the decoder was reset never completes
        if let Some(fence) = lost.filter(|f| stale.iter().all(|e| e.fence != *f)) {
            log::warn!("VXD: fence {} lost in reset", fence);
            self.fences.fail(fence, FailureReason::Reset);
        }
        for entry in stale {
            log::warn!("VXD: dropping fence {} queued across reset", entry.fence);
            self.fences.fail(entry.fence, FailureReason::Reset);
        }

        if let Some(words) = saved {
            for (i, word) in words.iter().enumerate() {
                self.io
                    .write32(regs::LOCAL_RAM_BASE + (i * WORD_SIZE) as u32, *word);
            }
            log::debug!("VXD: restored {} words of local RAM", words.len());
        }
        Ok(())
    }

    /// Power down for a pending firmware re-upload
    ///
    /// Returns true if the decoder was powered down. The firmware is then
    /// marked not loaded and only a re-initialisation stays owed.
    pub fn check_reset_fw(&self) -> bool {
        {
            let mut state = self.lock_state();
            if state.needs_reset != NeedsReset::ReuploadAndReinit {
                return false;
            }
            state.needs_reset = NeedsReset::Reinit;
            state.fw_loaded = false;
        }
        log::info!("VXD: powering down for firmware re-upload");
        self.platform.power_down();
        true
    }

    /// Save local RAM ahead of a power-down
    ///
    /// The next submission re-initialises the firmware and writes the
    /// saved words back.
    pub fn save_context(&self) -> Result<()> {
        let words = (regs::LOCAL_RAM_SIZE as usize) / WORD_SIZE;
        let mut saved = Vec::new();
        saved.try_reserve_exact(words).map_err(|_| Error::OutOfMemory)?;
        saved.extend(
            (0..words).map(|i| self.io.read32(regs::LOCAL_RAM_BASE + (i * WORD_SIZE) as u32)),
        );

        {
            let mut state = self.lock_state();
            state.needs_reset.merge(match self.config.revision {
                HwRevision::D0 => NeedsReset::Reinit,
                HwRevision::Legacy => NeedsReset::Generic,
            });
            state.saved_context = Some(saved);
        }

        if self.config.revision == HwRevision::D0 {
            self.io.write32(regs::MTX_ENABLE, 0);
            if let Err(e) = self.platform.reset_hardware() {
                log::warn!("VXD: reset before power-down failed: {}", e);
            }
            self.io.write32(regs::MAN_CLK_ENABLE, 0);
        }
        log::debug!("VXD: saved {} words of local RAM", words);
        Ok(())
    }

    /// Check if the decoder may be powered down
    pub fn check_idle(&self) -> bool {
        {
            let state = self.lock_state();
            if !state.fw_loaded {
                return true;
            }
            if state.busy {
                log::trace!("VXD: idle check: busy");
                return false;
            }
        }

        if self.config.revision == HwRevision::D0 {
            return self.io.read32(regs::COMMS_FW_STATUS) & regs::FW_STATUS_HW_IDLE != 0;
        }
        true
    }

    /// One periodic liveness tick
    ///
    /// A lockup is treated like a hardware panic on the in-flight fence:
    /// it is failed, the queue is flushed and the device is marked for
    /// recovery. While recovery is already owed the decoder is not
    /// expected to make progress and the tick reports idle.
    pub fn liveness_check(&self) -> Liveness {
        if self.lock_state().needs_reset.is_pending() {
            self.tracker.forget_observation();
            return Liveness::Idle;
        }

        let liveness = self.tracker.liveness_tick();
        match liveness {
            Liveness::Lockup => {
                log::error!("VXD: lockup at fence {}", self.tracker.in_flight());
                self.fault(None, FailureReason::Lockup);
            }
            Liveness::Progressing => {
                log::trace!("VXD: progressing at {}", self.tracker.last_completed());
            }
            Liveness::Idle => {}
        }
        liveness
    }

    /// Run a liveness tick and report whether the decoder locked up
    pub fn check_lockup(&self) -> bool {
        self.liveness_check() == Liveness::Lockup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_strongest() {
        let mut marker = NeedsReset::None;
        marker.merge(NeedsReset::Reinit);
        assert_eq!(marker, NeedsReset::Reinit);
        marker.merge(NeedsReset::ReuploadAndReinit);
        marker.merge(NeedsReset::Generic);
        assert_eq!(marker, NeedsReset::ReuploadAndReinit);
        assert!(marker.is_pending());
        assert!(!NeedsReset::None.is_pending());
    }

    #[test]
    fn test_fault_marker_by_revision() {
        assert_eq!(
            NeedsReset::for_fault(HwRevision::D0),
            NeedsReset::ReuploadAndReinit
        );
        assert_eq!(
            NeedsReset::for_fault(HwRevision::Legacy),
            NeedsReset::Generic
        );
    }
}
