//! # Fence Tracking
//!
//! Submission assigns fences, the completion handler advances the
//! completed fence, and the periodic liveness check watches the gap
//! between the two.
//!
//! All three values are plain atomics: the completion side runs in
//! interrupt context and never takes the device lock to update them.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use vxd_core::Seqno;

// =============================================================================
// FAILURE REASON
// =============================================================================

/// Why a fence was failed instead of signalled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Firmware rejected the command
    CommandFailed,
    /// Decoder hardware panicked while executing it
    HardwarePanic,
    /// Queued behind a fault and dropped unsent
    Flushed,
    /// The device stopped making progress
    Lockup,
    /// Could not be written to the firmware ring
    SendFailed,
    /// Still queued when the device was reset
    Reset,
    /// Still queued when the device was detached
    Detached,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFailed => write!(f, "command failed"),
            Self::HardwarePanic => write!(f, "hardware panic"),
            Self::Flushed => write!(f, "flushed after fault"),
            Self::Lockup => write!(f, "device lockup"),
            Self::SendFailed => write!(f, "send failed"),
            Self::Reset => write!(f, "dropped by reset"),
            Self::Detached => write!(f, "device detached"),
        }
    }
}

// =============================================================================
// LIVENESS
// =============================================================================

/// Result of one liveness tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Everything submitted has completed
    Idle,
    /// Work is outstanding and the completed fence moved since last tick
    Progressing,
    /// Work is outstanding and nothing completed for a whole tick
    Lockup,
}

// =============================================================================
// FENCE TRACKER
// =============================================================================

/// Submitted, completed and last-observed fence values
#[derive(Debug, Default)]
pub struct FenceTracker {
    last_submitted: AtomicU32,
    last_completed: AtomicU32,
    observed: AtomicU32,
    observed_valid: AtomicBool,
}

impl FenceTracker {
    /// Create a tracker with nothing submitted
    pub const fn new() -> Self {
        Self {
            last_submitted: AtomicU32::new(0),
            last_completed: AtomicU32::new(0),
            observed: AtomicU32::new(0),
            observed_valid: AtomicBool::new(false),
        }
    }

    /// Highest fence handed to the device
    pub fn last_submitted(&self) -> Seqno {
        Seqno::new(self.last_submitted.load(Ordering::Acquire))
    }

    /// Last fence the firmware reported as done
    pub fn last_completed(&self) -> Seqno {
        Seqno::new(self.last_completed.load(Ordering::Acquire))
    }

    /// Record a newly accepted submission, returning the previous value
    pub fn record_submitted(&self, fence: Seqno) -> Seqno {
        Seqno::new(self.last_submitted.swap(fence.raw(), Ordering::AcqRel))
    }

    /// Take back a submission that never reached the decoder
    ///
    /// Only undoes `fence` if nothing was submitted after it.
    pub fn withdraw(&self, fence: Seqno, previous: Seqno) {
        let _ = self.last_submitted.compare_exchange(
            fence.raw(),
            previous.raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Advance the completed fence to `fence`
    ///
    /// The completed fence never moves backwards and never passes the last
    /// submitted one. Returns false, leaving it alone, for a fence that is
    /// not pending.
    pub fn record_completed(&self, fence: Seqno) -> bool {
        let submitted = self.last_submitted();
        self.last_completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current = Seqno::new(current);
                (current.is_behind(fence) && submitted.has_reached(fence))
                    .then_some(fence.raw())
            })
            .is_ok()
    }

    /// Check if `fence` was submitted but has not completed
    pub fn is_pending(&self, fence: Seqno) -> bool {
        self.last_completed().is_behind(fence) && self.last_submitted().has_reached(fence)
    }

    /// Check if submitted work has not completed yet
    pub fn is_outstanding(&self) -> bool {
        self.last_completed().is_behind(self.last_submitted())
    }

    /// Best guess at the fence the hardware was executing
    ///
    /// While work is outstanding that is the one after the completed
    /// fence; otherwise the completed fence itself.
    pub fn in_flight(&self) -> Seqno {
        let completed = self.last_completed();
        if completed.is_behind(self.last_submitted()) {
            completed.next()
        } else {
            completed
        }
    }

    /// The fence a firmware fault should fail
    ///
    /// A reported fence is used when it is pending. Otherwise the in-flight
    /// fence is blamed, or nothing when no work is outstanding.
    pub fn failed_fence(&self, reported: Option<Seqno>) -> Option<Seqno> {
        reported
            .filter(|&fence| self.is_pending(fence))
            .or_else(|| self.is_outstanding().then(|| self.in_flight()))
    }

    /// Mark everything submitted as resolved
    ///
    /// Called once every outstanding fence has been failed through the
    /// registry, so nothing is left for the liveness check to wait on.
    pub fn settle(&self) {
        let submitted = self.last_submitted();
        let _ = self
            .last_completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Seqno::new(current)
                    .is_behind(submitted)
                    .then_some(submitted.raw())
            });
        self.forget_observation();
    }

    /// Forget the value captured by the previous liveness tick
    pub fn forget_observation(&self) {
        self.observed_valid.store(false, Ordering::Release);
    }

    /// One liveness tick
    ///
    /// The first tick with work outstanding only captures the completed
    /// fence. A later tick that finds it unchanged reports a lockup.
    pub fn liveness_tick(&self) -> Liveness {
        if !self.is_outstanding() {
            self.forget_observation();
            return Liveness::Idle;
        }

        let completed = self.last_completed().raw();
        let seen = self.observed_valid.load(Ordering::Acquire)
            && self.observed.load(Ordering::Acquire) == completed;
        if seen {
            return Liveness::Lockup;
        }

        self.observed.store(completed, Ordering::Release);
        self.observed_valid.store(true, Ordering::Release);
        Liveness::Progressing
    }
}
