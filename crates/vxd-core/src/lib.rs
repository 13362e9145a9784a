//! # VXD Core
//!
//! Foundational types for the video decode accelerator driver core.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        vxd-core                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Error     │  │   Seqno     │  │   DeviceConfig      │  │
//! │  │  (unified   │  │  (32-bit    │  │  (revision, ABI,    │  │
//! │  │   Result)   │  │   fences)   │  │   power policy)     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod error;
pub mod seqno;

// Re-exports for convenience
pub use config::{DeviceConfig, FirmwareAbi, HwRevision, PowerPolicy};
pub use error::{Error, Result, Violation};
pub use seqno::{Seqno, WRAP_THRESHOLD};

// =============================================================================
// SIZES
// =============================================================================

/// Machine word size used by every message field
pub const WORD_SIZE: usize = 4;

/// Host page size; a command buffer may not cross a page
pub const PAGE_SIZE: usize = 4096;
