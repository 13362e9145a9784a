//! # Firmware Message Envelopes
//!
//! Every host<->firmware message starts with a one-word header: bits 0..15
//! hold the message length in bytes and bits 16..31 the message id. Payload
//! fields follow at fixed byte offsets, each a little-endian 32-bit word.
//!
//! Host commands are handled as byte buffers (they arrive from client
//! memory); firmware replies are handled as word buffers (they are drained
//! word by word from the ring).

use arrayvec::ArrayVec;
use static_assertions::const_assert;

use vxd_core::{Error, FirmwareAbi, Result, Seqno, WORD_SIZE};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Size of the generic header in bytes
pub const HEADER_SIZE: usize = WORD_SIZE;

/// Largest message the interrupt path can hold, in words
pub const MAX_MESSAGE_WORDS: usize = 128;

/// Largest length the 16-bit size field can describe, in bytes
pub const MAX_ENCODED_SIZE: usize = 0xFFFC;

/// Fixed-capacity word buffer for one message
pub type MessageWords = ArrayVec<u32, MAX_MESSAGE_WORDS>;

// =============================================================================
// MESSAGE IDS
// =============================================================================

/// Message identifiers
pub mod id {
    /// Filler inserted so no message straddles the end of a ring
    pub const PADDING: u32 = 0x00;
    /// Decode a slice
    pub const RENDER: u32 = 0x81;
    /// Deblock a decoded frame
    pub const DEBLOCK: u32 = 0x82;
    /// Deblock, Medfield submission form
    pub const DEBLOCK_MFLD: u32 = 0x87;
    /// Out-of-loop deblock, Medfield submission form
    pub const OOLD_MFLD: u32 = 0x88;
    /// Firmware finished a command
    pub const CMD_COMPLETED: u32 = 0xC1;
    /// Firmware rejected a command
    pub const CMD_FAILED: u32 = 0xC6;
    /// Decoder hardware panic
    pub const CMD_HW_PANIC: u32 = 0xC8;

    /// Check if `id` may appear in a submitted command buffer
    pub const fn is_submittable(id: u32) -> bool {
        matches!(id, RENDER | DEBLOCK | DEBLOCK_MFLD | OOLD_MFLD)
    }

    /// Check if `id` is one of the deblock forms
    pub const fn is_deblock(id: u32) -> bool {
        matches!(id, DEBLOCK | DEBLOCK_MFLD | OOLD_MFLD)
    }
}

// =============================================================================
// FIELD LAYOUTS
// =============================================================================

/// Render (decode) command layout
pub mod render {
    /// Fence value (Classic)
    pub const FENCE: usize = 4;
    /// MMU page-table directory
    pub const MMU_PTD: usize = 8;
    /// Decode flags
    pub const FLAGS: usize = 12;
    /// Message id word (Deva fence)
    pub const MSG_ID: usize = 16;
    /// Command buffer device address
    pub const BUFFER_ADDR: usize = 20;
    /// Command buffer size
    pub const BUFFER_SIZE: usize = 24;
    /// Total size
    pub const SIZE: usize = 28;
}

/// Deblock command layout
pub mod deblock {
    /// Fence value
    pub const FENCE: usize = 4;
    /// Decode flags
    pub const FLAGS: usize = 8;
    /// MMU page-table directory, shifted right by 8
    pub const MMU_PTD: usize = 12;
    /// Deblock parameter block address
    pub const BUFFER_ADDR: usize = 16;
    /// Total size
    pub const SIZE: usize = 20;
}

/// Command-completed reply layout
pub mod completed {
    /// Fence value (Classic)
    pub const FENCE: usize = 4;
    /// Completion flags
    pub const FLAGS: usize = 8;
    /// Message id word (Deva fence)
    pub const MSG_ID: usize = 12;
    /// Last macroblock decoded
    pub const LAST_MB: usize = 16;
    /// Total size
    pub const SIZE: usize = 20;
}

/// Command-failed reply layout
pub mod failed {
    /// Fence value (Classic)
    pub const FENCE: usize = 4;
    /// Failure flags
    pub const FLAGS: usize = 8;
    /// Message id word (Deva fence)
    pub const MSG_ID: usize = 12;
    /// Total size
    pub const SIZE: usize = 16;
}

/// Hardware-panic reply layout
pub mod hw_panic {
    /// Fence value, zero when the firmware could not tell (Classic)
    pub const FENCE: usize = 4;
    /// First macroblock of the failing slice
    pub const FIRST_MB: usize = 8;
    /// Macroblock that faulted
    pub const FAULT_MB: usize = 12;
    /// Front-end status
    pub const FE_STATUS: usize = 16;
    /// Back-end status
    pub const BE_STATUS: usize = 20;
    /// Message id word (Deva fence)
    pub const MSG_ID: usize = 24;
    /// Total size
    pub const SIZE: usize = 28;
}

const_assert!(render::SIZE % WORD_SIZE == 0);
const_assert!(deblock::SIZE % WORD_SIZE == 0);
const_assert!(completed::SIZE % WORD_SIZE == 0);
const_assert!(failed::SIZE % WORD_SIZE == 0);
const_assert!(hw_panic::SIZE % WORD_SIZE == 0);
const_assert!(hw_panic::SIZE <= MAX_MESSAGE_WORDS * WORD_SIZE);
const_assert!(render::BUFFER_SIZE + WORD_SIZE == render::SIZE);
const_assert!(MAX_MESSAGE_WORDS * WORD_SIZE <= MAX_ENCODED_SIZE);

// =============================================================================
// FLAGS
// =============================================================================

bitflags::bitflags! {
    /// Flags carried by a command-completed reply
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompletionFlags: u32 {
        /// Host asked to be interrupted; the next queued command may go
        const HOST_INTERRUPT = 0x4000;
    }
}

bitflags::bitflags! {
    /// Flags in render and deblock commands
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DecodeFlags: u32 {
        /// Flush the MMU translation cache before executing
        const INVALIDATE_MMU = 0x10;
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// Generic message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message length in bytes, header included
    pub size: u32,
    /// Message id
    pub id: u32,
}

impl Header {
    /// Create a header
    pub const fn new(size: u32, id: u32) -> Self {
        Self { size, id }
    }

    /// Decode from the first message word
    #[inline]
    pub const fn from_word(word: u32) -> Self {
        Self {
            size: word & 0xFFFF,
            id: word >> 16,
        }
    }

    /// Encode as the first message word
    #[inline]
    pub const fn to_word(self) -> u32 {
        (self.id << 16) | (self.size & 0xFFFF)
    }

    /// Message length in words
    #[inline]
    pub const fn size_words(&self) -> usize {
        self.size as usize / WORD_SIZE
    }

    /// Check if this is a padding message
    #[inline]
    pub const fn is_padding(&self) -> bool {
        self.id == id::PADDING
    }

    /// Check the declared size against the bytes that remain
    pub fn check(&self, remaining: usize) -> Result<()> {
        let size = self.size as usize;
        if size % WORD_SIZE != 0 || size < HEADER_SIZE || size > remaining {
            return Err(Error::MalformedMessage);
        }
        Ok(())
    }
}

// =============================================================================
// BYTE ACCESS
// =============================================================================

/// Read and validate the header at the start of `buf`
pub fn read_header(buf: &[u8]) -> Result<Header> {
    let header = Header::from_word(read_field(buf, 0)?);
    header.check(buf.len())?;
    Ok(header)
}

/// Write a header at the start of `buf`
pub fn write_header(buf: &mut [u8], header: Header) -> Result<()> {
    write_field(buf, 0, header.to_word())
}

/// Read the word at byte `offset`
pub fn read_field(buf: &[u8], offset: usize) -> Result<u32> {
    let end = offset.checked_add(WORD_SIZE).ok_or(Error::MalformedMessage)?;
    let bytes: [u8; WORD_SIZE] = buf
        .get(offset..end)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::MalformedMessage)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Write the word at byte `offset`
pub fn write_field(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let end = offset.checked_add(WORD_SIZE).ok_or(Error::MalformedMessage)?;
    let slot = buf.get_mut(offset..end).ok_or(Error::MalformedMessage)?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Iterate the little-endian words of a message
///
/// Trailing bytes that do not fill a word are ignored; callers validate
/// the envelope first.
pub fn words(buf: &[u8]) -> impl Iterator<Item = u32> + '_ {
    buf.chunks_exact(WORD_SIZE)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
}

/// Copy a validated message into a word buffer
///
/// Fails with [`Error::MessageTooLarge`] past [`MAX_MESSAGE_WORDS`].
pub fn to_words(buf: &[u8]) -> Result<MessageWords> {
    let mut out = MessageWords::new();
    for word in words(buf) {
        out.try_push(word).map_err(|_| Error::MessageTooLarge)?;
    }
    Ok(out)
}

/// Read the word at byte `offset` of a word buffer
#[inline]
pub fn word_field(words: &[u32], offset: usize) -> Option<u32> {
    words.get(offset / WORD_SIZE).copied()
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// A validated message inside a byte buffer
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    header: Header,
    bytes: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Parse the message at the start of `buf`
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let header = read_header(buf)?;
        Ok(Self {
            header,
            bytes: &buf[..header.size as usize],
        })
    }

    /// Message header
    pub fn header(&self) -> Header {
        self.header
    }

    /// Message id
    pub fn id(&self) -> u32 {
        self.header.id
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a valid envelope holds at least its header
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw message bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Read a payload field, bounded to this message
    pub fn field(&self, offset: usize) -> Result<u32> {
        read_field(self.bytes, offset)
    }
}

/// Iterator over back-to-back messages in a buffer
///
/// Yields `(byte offset, envelope)` pairs. The first malformed message ends
/// the iteration after yielding its error.
#[derive(Debug, Clone)]
pub struct Envelopes<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for Envelopes<'a> {
    type Item = Result<(usize, Envelope<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match Envelope::parse(&self.buf[self.offset..]) {
            Ok(env) => {
                let at = self.offset;
                self.offset += env.len();
                Some(Ok((at, env)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Walk the messages packed back to back in `buf`
pub fn envelopes(buf: &[u8]) -> Envelopes<'_> {
    Envelopes {
        buf,
        offset: 0,
        failed: false,
    }
}

// =============================================================================
// FIRMWARE REPLIES
// =============================================================================

/// A decoded firmware->host message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMessage {
    /// Filler, carries nothing
    Padding,
    /// A command finished
    Completed {
        /// Fence of the finished command
        fence: Seqno,
        /// Completion flags
        flags: CompletionFlags,
        /// Last macroblock decoded
        last_mb: u32,
    },
    /// The firmware rejected a command
    Failed {
        /// Fence of the rejected command
        fence: Seqno,
        /// Raw failure flags
        flags: u32,
    },
    /// The decoder hardware panicked
    Panic {
        /// Fence of the failing command, if the firmware knows it
        fence: Option<Seqno>,
        /// First macroblock of the failing slice
        first_mb: u32,
        /// Macroblock that faulted
        fault_mb: u32,
        /// Front-end status
        fe_status: u32,
        /// Back-end status
        be_status: u32,
    },
}

impl FirmwareMessage {
    /// Decode one message from the words drained off the ring
    ///
    /// Fails with [`Error::UnsupportedMessage`] for ids the host does not
    /// expect from the firmware, and [`Error::MalformedMessage`] when the
    /// declared size disagrees with the words or the id's layout.
    pub fn decode(words: &[u32], abi: FirmwareAbi) -> Result<Self> {
        let first = words.first().copied().ok_or(Error::MalformedMessage)?;
        let header = Header::from_word(first);
        header.check(words.len() * WORD_SIZE)?;

        let need = |size: usize| {
            if (header.size as usize) < size {
                Err(Error::MalformedMessage)
            } else {
                Ok(())
            }
        };
        let get = |offset: usize| word_field(words, offset).ok_or(Error::MalformedMessage);

        match header.id {
            id::PADDING => Ok(Self::Padding),
            id::CMD_COMPLETED => {
                need(completed::SIZE)?;
                let fence = match abi {
                    FirmwareAbi::Classic => get(completed::FENCE)?,
                    FirmwareAbi::Deva => get(completed::MSG_ID)?,
                };
                Ok(Self::Completed {
                    fence: Seqno::new(fence),
                    flags: CompletionFlags::from_bits_truncate(get(completed::FLAGS)?),
                    last_mb: get(completed::LAST_MB)?,
                })
            }
            id::CMD_FAILED => {
                need(failed::SIZE)?;
                let fence = match abi {
                    FirmwareAbi::Classic => get(failed::FENCE)?,
                    FirmwareAbi::Deva => get(failed::MSG_ID)?,
                };
                Ok(Self::Failed {
                    fence: Seqno::new(fence),
                    flags: get(failed::FLAGS)?,
                })
            }
            id::CMD_HW_PANIC => {
                need(hw_panic::SIZE)?;
                let fence = match abi {
                    FirmwareAbi::Classic => get(hw_panic::FENCE)?,
                    FirmwareAbi::Deva => get(hw_panic::MSG_ID)?,
                };
                Ok(Self::Panic {
                    fence: (fence != 0).then_some(Seqno::new(fence)),
                    first_mb: get(hw_panic::FIRST_MB)?,
                    fault_mb: get(hw_panic::FAULT_MB)?,
                    fe_status: get(hw_panic::FE_STATUS)?,
                    be_status: get(hw_panic::BE_STATUS)?,
                })
            }
            other => Err(Error::UnsupportedMessage(other)),
        }
    }

    /// Encode as the firmware would place it on the ring
    pub fn encode(&self, abi: FirmwareAbi) -> MessageWords {
        let mut out = MessageWords::new();
        let (msg_id, size) = match self {
            Self::Padding => (id::PADDING, HEADER_SIZE),
            Self::Completed { .. } => (id::CMD_COMPLETED, completed::SIZE),
            Self::Failed { .. } => (id::CMD_FAILED, failed::SIZE),
            Self::Panic { .. } => (id::CMD_HW_PANIC, hw_panic::SIZE),
        };
        out.push(Header::new(size as u32, msg_id).to_word());
        while out.len() < size / WORD_SIZE {
            out.push(0);
        }

        let mut set = |offset: usize, value: u32| out[offset / WORD_SIZE] = value;
        let fence_at = |classic: usize, deva: usize| match abi {
            FirmwareAbi::Classic => classic,
            FirmwareAbi::Deva => deva,
        };

        match *self {
            Self::Padding => {}
            Self::Completed {
                fence,
                flags,
                last_mb,
            } => {
                set(fence_at(completed::FENCE, completed::MSG_ID), fence.raw());
                set(completed::FLAGS, flags.bits());
                set(completed::LAST_MB, last_mb);
            }
            Self::Failed { fence, flags } => {
                set(fence_at(failed::FENCE, failed::MSG_ID), fence.raw());
                set(failed::FLAGS, flags);
            }
            Self::Panic {
                fence,
                first_mb,
                fault_mb,
                fe_status,
                be_status,
            } => {
                set(
                    fence_at(hw_panic::FENCE, hw_panic::MSG_ID),
                    fence.map_or(0, Seqno::raw),
                );
                set(hw_panic::FIRST_MB, first_mb);
                set(hw_panic::FAULT_MB, fault_mb);
                set(hw_panic::FE_STATUS, fe_status);
                set(hw_panic::BE_STATUS, be_status);
            }
        }
        out
    }
}
