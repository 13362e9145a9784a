//! # Ring Channels
//!
//! Circular word buffers in decoder local RAM, shared with the firmware.
//!
//! Each index register has exactly one writer: the producer owns the write
//! index, the consumer owns the read index. One slot always stays empty so
//! a full ring can be told apart from an empty one. A message never
//! straddles the end of the ring; the producer fills the tail with a
//! padding message and restarts at word zero instead.

use core::sync::atomic::{AtomicU64, Ordering};

use vxd_core::{Error, Result, Violation, WORD_SIZE};
use vxd_hal::{regs, RegisterIo, RingGeometry};

use crate::message::{self, Header, MessageWords, MAX_MESSAGE_WORDS};

/// Largest ring whose padding still fits the 16-bit size field
pub const MAX_RING_WORDS: u32 = (message::MAX_ENCODED_SIZE / WORD_SIZE) as u32;

/// Free words in a ring of `capacity` words with the given indices
#[inline]
pub const fn free_words(capacity: u32, read: u32, write: u32) -> u32 {
    capacity - 1 - (write + capacity - read) % capacity
}

// =============================================================================
// RING LAYOUT
// =============================================================================

/// Control registers of one ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Geometry register
    pub buf_size: u32,
    /// Read index register (consumer writes)
    pub read_index: u32,
    /// Write index register (producer writes)
    pub write_index: u32,
    /// Register written with 1 after each message, if any
    pub doorbell: Option<u32>,
}

impl RingLayout {
    /// Host->firmware ring
    pub const TO_FIRMWARE: Self = Self {
        buf_size: regs::COMMS_TO_MTX_BUF_SIZE,
        read_index: regs::COMMS_TO_MTX_RD_INDEX,
        write_index: regs::COMMS_TO_MTX_WRT_INDEX,
        doorbell: Some(regs::MTX_KICK),
    };

    /// Firmware->host ring
    pub const TO_HOST: Self = Self {
        buf_size: regs::COMMS_TO_HOST_BUF_SIZE,
        read_index: regs::COMMS_TO_HOST_RD_INDEX,
        write_index: regs::COMMS_TO_HOST_WRT_INDEX,
        doorbell: None,
    };
}

// =============================================================================
// RING STATISTICS
// =============================================================================

/// Ring statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Messages written or read
    pub messages: u64,
    /// Padding messages inserted
    pub paddings: u64,
    /// Writes refused for lack of space
    pub stalls: u64,
}

// =============================================================================
// RING CHANNEL
// =============================================================================

/// One direction of host/firmware messaging
///
/// Holds no ring state of its own: geometry and indices are re-read from
/// the shared registers on every call, since the other side moves them.
#[derive(Debug)]
pub struct RingChannel {
    layout: RingLayout,
    messages: AtomicU64,
    paddings: AtomicU64,
    stalls: AtomicU64,
}

impl RingChannel {
    /// Create a channel over `layout`
    pub const fn new(layout: RingLayout) -> Self {
        Self {
            layout,
            messages: AtomicU64::new(0),
            paddings: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
        }
    }

    /// Host->firmware channel
    pub const fn to_firmware() -> Self {
        Self::new(RingLayout::TO_FIRMWARE)
    }

    /// Firmware->host channel
    pub const fn to_host() -> Self {
        Self::new(RingLayout::TO_HOST)
    }

    /// Control register layout
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Read and check the ring geometry
    pub fn geometry<R: RegisterIo + ?Sized>(&self, io: &R) -> Result<RingGeometry> {
        let raw = io.read32(self.layout.buf_size);
        let geom = RingGeometry::decode(raw);
        if geom.capacity_words == 0 || geom.capacity_words > MAX_RING_WORDS {
            log::error!("VXD ring: bad geometry {:#010x}", raw);
            return Err(Violation::BadGeometry.into());
        }
        Ok(geom)
    }

    /// Read both indices, checking them against the capacity
    fn indices<R: RegisterIo + ?Sized>(&self, io: &R, geom: &RingGeometry) -> Result<(u32, u32)> {
        let read = io.read32(self.layout.read_index);
        let write = io.read32(self.layout.write_index);
        if read >= geom.capacity_words || write >= geom.capacity_words {
            log::error!(
                "VXD ring: index out of range (read {}, write {}, capacity {})",
                read,
                write,
                geom.capacity_words
            );
            return Err(Violation::IndexOutOfRange.into());
        }
        Ok((read, write))
    }

    /// Words that can be written before the ring is full
    pub fn free_slots<R: RegisterIo + ?Sized>(&self, io: &R) -> Result<u32> {
        let geom = self.geometry(io)?;
        let (read, write) = self.indices(io, &geom)?;
        Ok(free_words(geom.capacity_words, read, write))
    }

    /// Check if the consumer has caught up with the producer
    pub fn is_empty<R: RegisterIo + ?Sized>(&self, io: &R) -> Result<bool> {
        let geom = self.geometry(io)?;
        let (read, write) = self.indices(io, &geom)?;
        Ok(read == write)
    }

    /// Write one message as the producer
    ///
    /// `message` must start with a valid header; exactly the declared size
    /// is written. Nothing is written unless the whole message (and any
    /// padding it needs) fits.
    pub fn enqueue<R: RegisterIo + ?Sized>(&self, io: &R, message: &[u32]) -> Result<()> {
        let first = message.first().copied().ok_or(Error::MalformedMessage)?;
        let header = Header::from_word(first);
        header.check(message.len() * WORD_SIZE)?;
        let len = header.size_words() as u32;

        let geom = self.geometry(io)?;
        let cap = geom.capacity_words;
        if len > cap {
            log::warn!("VXD ring: {} word message exceeds {} word ring", len, cap);
            return Err(Error::MessageTooLarge);
        }

        let (read, write) = self.indices(io, &geom)?;
        let free = free_words(cap, read, write);

        let mut at = write;
        if write + len > cap {
            let pad = cap - write;
            if header.is_padding() {
                log::error!("VXD ring: padding at {} would wrap", write);
                return Err(Violation::PaddingWouldWrap.into());
            }
            if read == 0 {
                log::error!("VXD ring: wrap needed at {} with read index 0", write);
                return Err(Violation::ReadIndexZeroOnWrap.into());
            }
            if pad + len > free {
                self.stalls.fetch_add(1, Ordering::Relaxed);
                return Err(Error::ChannelFull);
            }
            self.write_padding(io, &geom, write, pad);
            at = 0;
        } else if len > free {
            self.stalls.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ChannelFull);
        }

        for (i, &word) in message[..len as usize].iter().enumerate() {
            io.write32(geom.word_offset(at + i as u32), word);
        }
        io.write32(self.layout.write_index, (at + len) % cap);
        if let Some(doorbell) = self.layout.doorbell {
            io.write32(doorbell, 1);
        }

        self.messages.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "VXD ring: wrote id {:#04x} ({} words) at {}",
            header.id,
            len,
            at
        );
        Ok(())
    }

    fn write_padding<R: RegisterIo + ?Sized>(
        &self,
        io: &R,
        geom: &RingGeometry,
        at: u32,
        pad: u32,
    ) {
        let header = Header::new(pad * WORD_SIZE as u32, message::id::PADDING);
        io.write32(geom.word_offset(at), header.to_word());
        for i in 1..pad {
            io.write32(geom.word_offset(at + i), 0);
        }
        self.paddings.fetch_add(1, Ordering::Relaxed);
        log::trace!("VXD ring: padded {} words at {}", pad, at);
    }

    /// Read one message as the consumer
    ///
    /// The header word gives the length; the new read index is published
    /// as soon as the words are copied out. A message too long for the
    /// scratch buffer is consumed and reported as
    /// [`Error::MessageTooLarge`]. A size that is not a whole number of
    /// words is rounded up, consumed and reported as
    /// [`Error::MalformedMessage`]. A header claiming more words than were
    /// written discards everything up to the write index.
    pub fn dequeue_one<R: RegisterIo + ?Sized>(&self, io: &R) -> Result<Option<MessageWords>> {
        let geom = self.geometry(io)?;
        let cap = geom.capacity_words;
        let (read, write) = self.indices(io, &geom)?;
        if read == write {
            return Ok(None);
        }

        let header = Header::from_word(io.read32(geom.word_offset(read)));
        // A zero-size header still consumes its own word
        let len = header.size.div_ceil(WORD_SIZE as u32).max(1);
        let available = (write + cap - read) % cap;

        if len > available {
            log::error!(
                "VXD ring: message of {} words at {} overruns {} available",
                len,
                read,
                available
            );
            io.write32(self.layout.read_index, write);
            return Err(Error::MalformedMessage);
        }

        let next = (read + len) % cap;
        if len as usize > MAX_MESSAGE_WORDS {
            log::error!("VXD ring: dropping {} word message id {:#04x}", len, header.id);
            io.write32(self.layout.read_index, next);
            return Err(Error::MessageTooLarge);
        }

        if header.size % WORD_SIZE as u32 != 0 {
            log::error!(
                "VXD ring: dropping message id {:#04x} with unaligned size {}",
                header.id,
                header.size
            );
            io.write32(self.layout.read_index, next);
            return Err(Error::MalformedMessage);
        }

        let mut words = MessageWords::new();
        for i in 0..len {
            words.push(io.read32(geom.word_offset((read + i) % cap)));
        }
        io.write32(self.layout.read_index, next);

        self.messages.fetch_add(1, Ordering::Relaxed);
        Ok(Some(words))
    }

    /// Get ring statistics
    pub fn stats(&self) -> RingStats {
        RingStats {
            messages: self.messages.load(Ordering::Relaxed),
            paddings: self.paddings.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use vxd_hal::MockRegisters;

    const CAP: u32 = 64;
    const TO_FW_OFFSET: u32 = 0x0100;
    const TO_HOST_OFFSET: u32 = 0x0400;

    fn setup(read: u32, write: u32) -> MockRegisters {
        let regs = MockRegisters::new();
        regs.poke(
            regs::COMMS_TO_MTX_BUF_SIZE,
            RingGeometry::encode(CAP, TO_FW_OFFSET),
        );
        regs.poke(regs::COMMS_TO_MTX_RD_INDEX, read);
        regs.poke(regs::COMMS_TO_MTX_WRT_INDEX, write);
        regs
    }

    fn msg(words: usize, id: u32) -> Vec<u32> {
        let mut out = alloc::vec![0xA5A5_0000 | words as u32; words];
        out[0] = Header::new((words * WORD_SIZE) as u32, id).to_word();
        out
    }

    fn ring_word(regs: &MockRegisters, index: u32) -> u32 {
        regs.peek(RingGeometry::decode(RingGeometry::encode(CAP, TO_FW_OFFSET)).word_offset(index))
    }

    #[test]
    fn test_free_words_formula() {
        assert_eq!(free_words(64, 0, 0), 63);
        assert_eq!(free_words(64, 10, 9), 0);
        assert_eq!(free_words(64, 30, 10), 19);
        assert_eq!(free_words(64, 10, 30), 43);
    }

    #[test]
    fn test_exact_fit_succeeds() {
        let regs = setup(30, 10);
        let ring = RingChannel::to_firmware();
        assert_eq!(ring.free_slots(&regs), Ok(19));

        ring.enqueue(&regs, &msg(19, message::id::RENDER)).unwrap();
        assert_eq!(regs.peek(regs::COMMS_TO_MTX_WRT_INDEX), 29);
        assert_eq!(ring.free_slots(&regs), Ok(0));
        assert_eq!(regs.write_count(regs::MTX_KICK), 1);
    }

    #[test]
    fn test_one_word_over_is_channel_full() {
        let regs = setup(30, 10);
        let ring = RingChannel::to_firmware();

        assert_eq!(
            ring.enqueue(&regs, &msg(20, message::id::RENDER)),
            Err(Error::ChannelFull)
        );
        assert_eq!(regs.write_count(regs::COMMS_TO_MTX_WRT_INDEX), 0);
        assert_eq!(regs.write_count(regs::MTX_KICK), 0);
        assert_eq!(ring.stats().stalls, 1);
    }

    #[test]
    fn test_wrap_inserts_one_padding() {
        let regs = setup(10, 60);
        let ring = RingChannel::to_firmware();

        ring.enqueue(&regs, &msg(8, message::id::RENDER)).unwrap();

        let pad = Header::from_word(ring_word(&regs, 60));
        assert_eq!(pad, Header::new(4 * WORD_SIZE as u32, message::id::PADDING));
        assert!((61..64).all(|i| ring_word(&regs, i) == 0));
        assert_eq!(
            Header::from_word(ring_word(&regs, 0)).id,
            message::id::RENDER
        );
        assert_eq!(regs.peek(regs::COMMS_TO_MTX_WRT_INDEX), 8);
        assert_eq!(ring.stats().paddings, 1);
        assert_eq!(regs.write_count(regs::MTX_KICK), 1);
    }

    #[test]
    fn test_message_ending_at_capacity_needs_no_padding() {
        let regs = setup(5, 56);
        let ring = RingChannel::to_firmware();

        ring.enqueue(&regs, &msg(8, message::id::DEBLOCK)).unwrap();
        assert_eq!(regs.peek(regs::COMMS_TO_MTX_WRT_INDEX), 0);
        assert_eq!(ring.stats().paddings, 0);
    }

    #[test]
    fn test_wrap_without_room_is_channel_full() {
        // 4 words of padding + 8 words needs read index past 8
        let regs = setup(8, 60);
        let ring = RingChannel::to_firmware();

        assert_eq!(
            ring.enqueue(&regs, &msg(8, message::id::RENDER)),
            Err(Error::ChannelFull)
        );
        assert_eq!(ring_word(&regs, 60), 0);
        assert_eq!(regs.peek(regs::COMMS_TO_MTX_WRT_INDEX), 60);
    }

    #[test]
    fn test_wrap_with_read_index_zero_is_violation() {
        let regs = setup(0, 60);
        let ring = RingChannel::to_firmware();

        assert_eq!(
            ring.enqueue(&regs, &msg(8, message::id::RENDER)),
            Err(Error::ProtocolViolation(Violation::ReadIndexZeroOnWrap))
        );
        assert_eq!(regs.write_count(regs::COMMS_TO_MTX_WRT_INDEX), 0);
    }

    #[test]
    fn test_padding_that_would_wrap_is_violation() {
        let regs = setup(10, 60);
        let ring = RingChannel::to_firmware();

        assert_eq!(
            ring.enqueue(&regs, &msg(8, message::id::PADDING)),
            Err(Error::ProtocolViolation(Violation::PaddingWouldWrap))
        );
    }

    #[test]
    fn test_message_larger_than_ring() {
        let regs = setup(0, 0);
        let ring = RingChannel::to_firmware();

        assert_eq!(
            ring.enqueue(&regs, &msg(CAP as usize + 1, message::id::RENDER)),
            Err(Error::MessageTooLarge)
        );
        assert_eq!(regs.write_count(regs::COMMS_TO_MTX_WRT_INDEX), 0);
    }

    #[test]
    fn test_malformed_header_rejected() {
        let regs = setup(0, 0);
        let ring = RingChannel::to_firmware();
        let mut bad = msg(4, message::id::RENDER);
        bad[0] = Header::new(32, message::id::RENDER).to_word();

        assert_eq!(ring.enqueue(&regs, &bad), Err(Error::MalformedMessage));
        assert_eq!(ring.enqueue(&regs, &[]), Err(Error::MalformedMessage));
    }

    #[test]
    fn test_geometry_and_index_checks() {
        let regs = setup(0, 0);
        let ring = RingChannel::to_firmware();

        regs.poke(regs::COMMS_TO_MTX_BUF_SIZE, 0);
        assert_eq!(
            ring.free_slots(&regs),
            Err(Error::ProtocolViolation(Violation::BadGeometry))
        );

        regs.poke(
            regs::COMMS_TO_MTX_BUF_SIZE,
            RingGeometry::encode(CAP, TO_FW_OFFSET),
        );
        regs.poke(regs::COMMS_TO_MTX_WRT_INDEX, CAP);
        assert_eq!(
            ring.free_slots(&regs),
            Err(Error::ProtocolViolation(Violation::IndexOutOfRange))
        );
    }

    fn host_setup(cap: u32, read: u32, write: u32) -> (MockRegisters, RingGeometry) {
        let regs = MockRegisters::new();
        let raw = RingGeometry::encode(cap, TO_HOST_OFFSET);
        regs.poke(regs::COMMS_TO_HOST_BUF_SIZE, raw);
        regs.poke(regs::COMMS_TO_HOST_RD_INDEX, read);
        regs.poke(regs::COMMS_TO_HOST_WRT_INDEX, write);
        (regs, RingGeometry::decode(raw))
    }

    #[test]
    fn test_dequeue_reads_and_publishes_read_index() {
        let (regs, geom) = host_setup(CAP, 2, 7);
        let words = msg(5, message::id::CMD_COMPLETED);
        for (i, w) in words.iter().enumerate() {
            regs.poke(geom.word_offset(2 + i as u32), *w);
        }
        let ring = RingChannel::to_host();

        let got = ring.dequeue_one(&regs).unwrap().unwrap();
        assert_eq!(got.as_slice(), words.as_slice());
        assert_eq!(regs.peek(regs::COMMS_TO_HOST_RD_INDEX), 7);
        assert_eq!(ring.dequeue_one(&regs), Ok(None));
        assert_eq!(ring.is_empty(&regs), Ok(true));
    }

    #[test]
    fn test_dequeue_zero_size_consumes_one_word() {
        let (regs, _) = host_setup(CAP, 0, 3);
        let ring = RingChannel::to_host();

        let got = ring.dequeue_one(&regs).unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(regs.peek(regs::COMMS_TO_HOST_RD_INDEX), 1);
    }

    #[test]
    fn test_dequeue_oversized_is_consumed() {
        let (regs, geom) = host_setup(256, 0, 200);
        regs.poke(
            geom.word_offset(0),
            Header::new(130 * WORD_SIZE as u32, message::id::CMD_COMPLETED).to_word(),
        );
        let ring = RingChannel::to_host();

        assert_eq!(ring.dequeue_one(&regs), Err(Error::MessageTooLarge));
        assert_eq!(regs.peek(regs::COMMS_TO_HOST_RD_INDEX), 130);
    }

    #[test]
    fn test_dequeue_overrun_discards_burst() {
        let (regs, geom) = host_setup(CAP, 0, 3);
        regs.poke(
            geom.word_offset(0),
            Header::new(8 * WORD_SIZE as u32, message::id::CMD_COMPLETED).to_word(),
        );
        let ring = RingChannel::to_host();

        assert_eq!(ring.dequeue_one(&regs), Err(Error::MalformedMessage));
        assert_eq!(regs.peek(regs::COMMS_TO_HOST_RD_INDEX), 3);
    }

    #[test]
    fn test_dequeue_unaligned_size_is_consumed() {
        let (regs, geom) = host_setup(CAP, 0, 7);
        // Six bytes spans two words
        regs.poke(
            geom.word_offset(0),
            Header::new(6, message::id::CMD_COMPLETED).to_word(),
        );
        regs.poke(geom.word_offset(1), 0xDEAD_BEEF);
        let words = msg(5, message::id::CMD_COMPLETED);
        for (i, w) in words.iter().enumerate() {
            regs.poke(geom.word_offset(2 + i as u32), *w);
        }
        let ring = RingChannel::to_host();

        assert_eq!(ring.dequeue_one(&regs), Err(Error::MalformedMessage));
        assert_eq!(regs.peek(regs::COMMS_TO_HOST_RD_INDEX), 2);

        let got = ring.dequeue_one(&regs).unwrap().unwrap();
        assert_eq!(got.as_slice(), words.as_slice());
        assert_eq!(regs.peek(regs::COMMS_TO_HOST_RD_INDEX), 7);
    }
}
