//! # VXD RPC
//!
//! Host/firmware messaging for the video decode controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   TO_FIRMWARE ring    ┌──────────────┐
//! │              │ ────────────────────▶ │              │
//! │     Host     │   (MTX_KICK doorbell) │   Firmware   │
//! │    driver    │                       │    (MTX)     │
//! │              │ ◀──────────────────── │              │
//! └──────────────┘    TO_HOST ring       └──────────────┘
//!                     (MTX interrupt)
//! ```
//!
//! - [`message`]: envelope header, message ids, field layouts, reply decoding
//! - [`ring`]: the shared-memory ring channels with padding and backpressure

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(test)]
extern crate alloc;

pub mod message;
pub mod ring;

#[cfg(any(test, feature = "mock"))]
pub mod sim;

// Re-exports
pub use message::{
    CompletionFlags, DecodeFlags, Envelope, FirmwareMessage, Header, MessageWords, HEADER_SIZE,
    MAX_MESSAGE_WORDS,
};
pub use ring::{RingChannel, RingLayout, RingStats};

#[cfg(any(test, feature = "mock"))]
pub use sim::FirmwareSide;
