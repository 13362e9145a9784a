//! # VXD Error Handling
//!
//! Error types for the video decode driver core.
//!
//! Error handling in VXD follows these principles:
//! - Errors are typed and categorized by the path that raises them
//! - Per-submission errors never leave queue or busy state half-updated
//! - Asynchronous firmware faults travel through the fence registry, not here
//! - Errors are `no_std` compatible

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// VXD Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// VXD unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Message Errors
    // =========================================================================
    /// Envelope is corrupt: bad size alignment, size below the header,
    /// or size beyond the remaining buffer
    MalformedMessage,
    /// Message id is not accepted on this path
    UnsupportedMessage(u32),
    /// Command buffer crosses or exceeds one page
    CommandTooLarge,
    /// Message does not fit the ring or the interrupt scratch buffer
    MessageTooLarge,

    // =========================================================================
    // Channel Errors
    // =========================================================================
    /// Not enough free words in the ring; transient backpressure
    ChannelFull,
    /// Ring or queue state that must never be observed
    ProtocolViolation(Violation),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Pending entry allocation failed or the queue depth limit was hit
    OutOfMemory,
    /// Command buffer mapping collaborator failed
    MapFailed,

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// Firmware reported a failed command or a hardware panic
    DeviceFault,
    /// Liveness check found no progress across a full interval
    Lockup,
    /// Hardware reset requested by recovery failed
    ResetFailed,
    /// Firmware image upload failed
    FirmwareLoadFailed,
    /// Firmware re-initialization failed
    FirmwareInitFailed,
    /// Device configuration rejected at attach
    InvalidConfig,
}

impl Error {
    /// Check if the error is transient backpressure a caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelFull)
    }

    /// Check if the error leaves the device needing recovery
    pub fn is_fatal_for_device(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation(_) | Self::Lockup | Self::ResetFailed | Self::DeviceFault
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Message
            Self::MalformedMessage => write!(f, "malformed message envelope"),
            Self::UnsupportedMessage(id) => write!(f, "unsupported message id {:#04x}", id),
            Self::CommandTooLarge => write!(f, "command buffer exceeds page boundary"),
            Self::MessageTooLarge => write!(f, "message exceeds channel capacity"),

            // Channel
            Self::ChannelFull => write!(f, "channel full"),
            Self::ProtocolViolation(v) => write!(f, "protocol invariant violated: {}", v),

            // Resource
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::MapFailed => write!(f, "command buffer mapping failed"),

            // Device
            Self::DeviceFault => write!(f, "firmware reported a device fault"),
            Self::Lockup => write!(f, "device lockup detected"),
            Self::ResetFailed => write!(f, "hardware reset failed"),
            Self::FirmwareLoadFailed => write!(f, "firmware upload failed"),
            Self::FirmwareInitFailed => write!(f, "firmware initialization failed"),
            Self::InvalidConfig => write!(f, "invalid device configuration"),
        }
    }
}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Protocol invariant violations
///
/// Each of these means continuing could silently corrupt the ring, so they
/// are logged and escalated rather than retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A wrap was required while the firmware read index sits at zero
    ReadIndexZeroOnWrap,
    /// `ChannelFull` on the send path after the busy flag was taken
    ChannelFullWhileIdle,
    /// A padding message itself would straddle the end of the ring
    PaddingWouldWrap,
    /// Ring geometry register reports zero capacity
    BadGeometry,
    /// A shared index register holds a value outside the ring
    IndexOutOfRange,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadIndexZeroOnWrap => write!(f, "read index is zero during a forced wrap"),
            Self::ChannelFullWhileIdle => write!(f, "channel full while holding the busy flag"),
            Self::PaddingWouldWrap => write!(f, "padding message would wrap"),
            Self::BadGeometry => write!(f, "ring capacity is zero"),
            Self::IndexOutOfRange => write!(f, "ring index outside capacity"),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Error::ProtocolViolation(v)
    }
}
