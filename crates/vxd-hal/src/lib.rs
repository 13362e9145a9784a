//! # VXD Hardware Abstraction Layer
//!
//! Register map and word access for the video decode controller.
//!
//! The driver core never touches hardware except through [`RegisterIo`]:
//! control registers, interrupt status, and the ring buffers in local RAM
//! are all plain 32-bit register reads and writes.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(test, feature = "mock"))]
extern crate alloc;

pub mod io;
pub mod irq;
pub mod regs;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-exports
pub use io::{MmioRegion, RegisterIo};
pub use irq::InterruptStatus;
pub use regs::RingGeometry;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockRegisters;
