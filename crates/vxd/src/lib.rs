//! # VXD
//!
//! Command dispatch and firmware messaging for an embedded video decode
//! controller.
//!
//! ## Architecture
//!
//! ```text
//! client ──▶ submit_command ──┬──▶ RingChannel (TO_FIRMWARE) ──▶ firmware
//!                             │                                    │
//!                             └──▶ CommandQueue (decoder busy)     │
//!                                        ▲                         ▼
//!                                        │                     interrupt
//!                                        │                         │
//!             FenceRegistry ◀── on_interrupt ◀── RingChannel (TO_HOST)
//! ```
//!
//! - [`submit`]: validation, fence/MMU patching, send-or-queue decision
//! - [`irq`]: completion, command-failed and hardware-panic handling
//! - [`recovery`]: reset markers, firmware reload, context save, liveness
//! - [`device`]: the per-decoder context tying it all together

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod device;
pub mod fence;
pub mod irq;
pub mod mmu;
pub mod platform;
pub mod queue;
pub mod recovery;
pub mod submit;

// Re-exports for convenience
pub use device::{DecodeStatus, Device};
pub use fence::{FailureReason, FenceTracker, Liveness};
pub use mmu::MmuContext;
pub use platform::{CommandMapper, FenceRegistry, Platform};
pub use queue::{CommandQueue, PendingCommand};
pub use recovery::NeedsReset;

pub use vxd_core::{DeviceConfig, Error, FirmwareAbi, HwRevision, PowerPolicy, Result, Seqno};
