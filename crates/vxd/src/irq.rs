//! # Completion and Fault Handling
//!
//! Interrupt-context side of the device. Drains the firmware->host ring
//! into a fixed stack buffer, advances the completed fence, feeds the next
//! queued command to the firmware and turns firmware faults into failed
//! fences plus a recovery marker.
//!
//! Nothing here blocks or allocates; only queue entries are freed.

use core::sync::atomic::Ordering;

use vxd_core::{Error, HwRevision, Seqno};
use vxd_hal::{regs, InterruptStatus, RegisterIo};
use vxd_rpc::{CompletionFlags, FirmwareMessage, Header};

use crate::device::Device;
use crate::fence::FailureReason;
use crate::platform::{FenceRegistry, Platform};
use crate::recovery::NeedsReset;

/// How a drain pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// Ring empty
    Empty,
    /// Stopped on a message that cannot be trusted
    Aborted,
}

impl<R, P, F> Device<R, P, F>
where
    R: RegisterIo,
    P: Platform,
    F: FenceRegistry,
{
    /// Top-level interrupt handler
    ///
    /// Returns false if no decoder interrupt source was raised.
    pub fn on_interrupt(&self) -> bool {
        let status = InterruptStatus::read(&self.io);

        if self.config.revision == HwRevision::Legacy && status.has_mmu_fault() {
            log::error!("VXD: MMU fault (status {:#x})", status.bits());
            self.io
                .write32(regs::MMU_CONTROL0, regs::MMU_CONTROL0_PAUSE);
            InterruptStatus::clear(&self.io, InterruptStatus::MMU_FAULT.bits());
            self.lock_state().needs_reset.merge(NeedsReset::Generic);
            return true;
        }

        if status.contains(InterruptStatus::MTX) {
            log::trace!("VXD: MTX interrupt (status {:#x})", status.bits());
            let clear = match self.config.revision {
                HwRevision::D0 => InterruptStatus::MTX.bits(),
                HwRevision::Legacy => regs::INTERRUPT_CLEAR_ALL,
            };
            InterruptStatus::clear(&self.io, clear);
            self.drain_to_host();
            return true;
        }

        false
    }

    /// Drain and dispatch every message on the firmware->host ring
    pub fn drain_to_host(&self) {
        // Local RAM is unreadable with the clocks gated
        if self.io.read32(regs::MAN_CLK_ENABLE) != regs::CLK_ENABLE_ALL {
            log::debug!("VXD: clocks gated at interrupt, enabling");
            self.io.write32(regs::MAN_CLK_ENABLE, regs::CLK_ENABLE_ALL);
        }

        if self.drain_pass() == Drain::Aborted {
            self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        }

        if self.config.schedules_idle_check() {
            self.platform.schedule_idle_check();
        }
    }

    fn drain_pass(&self) -> Drain {
        loop {
            let words = match self.to_host.dequeue_one(&self.io) {
                Ok(Some(words)) => words,
                Ok(None) => return Drain::Empty,
                Err(e) => {
                    log::error!("VXD: firmware ring read failed: {}", e);
                    if let Error::ProtocolViolation(_) = e {
                        self.lock_state().needs_reset.merge(NeedsReset::Generic);
                    }
                    return Drain::Aborted;
                }
            };

            if self.lock_state().needs_reset.is_pending() {
                let header = words.first().copied().map(Header::from_word);
                log::trace!("VXD: discarding {:?} while reset pending", header);
                continue;
            }

            match FirmwareMessage::decode(&words, self.config.abi) {
                Ok(msg) => self.dispatch(msg),
                Err(e) => {
                    log::error!("VXD: bad message from firmware: {}", e);
                    return Drain::Aborted;
                }
            }
        }
    }

    fn dispatch(&self, msg: FirmwareMessage) {
        match msg {
            FirmwareMessage::Padding => {}
            FirmwareMessage::Completed { fence, flags, .. } => {
                log::debug!("VXD: completed fence {} (flags {:#x})", fence, flags.bits());
                if self.tracker.record_completed(fence) {
                    self.fences.signal(fence);
                } else {
                    log::warn!(
                        "VXD: ignoring completion of fence {} (completed {}, submitted {})",
                        fence,
                        self.tracker.last_completed(),
                        self.tracker.last_submitted()
                    );
                }
                if flags.contains(CompletionFlags::HOST_INTERRUPT) {
                    self.dequeue_send();
                }
            }
            FirmwareMessage::Failed { fence, flags } => {
                log::error!("VXD: command failed at fence {} (flags {:#x})", fence, flags);
                self.fault(Some(fence), FailureReason::CommandFailed);
            }
            FirmwareMessage::Panic {
                fence,
                first_mb,
                fault_mb,
                fe_status,
                be_status,
            } => {
                log::error!(
                    "VXD: hardware panic at fence {:?} (mb {}..{}, fe {:#x}, be {:#x})",
                    fence,
                    first_mb,
                    fault_mb,
                    fe_status,
                    be_status
                );
                self.fault(fence, FailureReason::HardwarePanic);
            }
        }
    }

    /// Fail the faulting fence, flush the queue and mark the device for
    /// recovery
    ///
    /// `reported` is the fence the firmware named, if any. It is only
    /// trusted while still pending; otherwise the command in flight is
    /// blamed. Every other outstanding fence is failed as flushed and the
    /// tracker settles, so nothing is left for the liveness check.
    pub(crate) fn fault(&self, reported: Option<Seqno>, reason: FailureReason) {
        let fence = self.tracker.failed_fence(reported);
        if let Some(fence) = fence {
            self.fences.fail(fence, reason);
        }

        self.lock_state().fw_error = true;
        let flushed = self.abandon(NeedsReset::for_fault(self.config.revision), fence);
        log::error!(
            "VXD: fault at fence {:?} ({}), {} queued commands failed",
            fence,
            reason,
            flushed
        );
    }
}
