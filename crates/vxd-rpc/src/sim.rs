//! # Firmware Simulator
//!
//! Plays the firmware end of both rings over any [`RegisterIo`], so the
//! host side can be exercised without hardware. The simulator is the
//! consumer of the host->firmware ring and the producer of the
//! firmware->host ring, the mirror image of the driver.

use arrayvec::ArrayVec;

use vxd_core::{FirmwareAbi, Result};
use vxd_hal::{regs, InterruptStatus, RegisterIo, RingGeometry};

use crate::message::{FirmwareMessage, Header, MessageWords};
use crate::ring::RingChannel;

/// Default host->firmware ring capacity in words
pub const DEFAULT_TO_FIRMWARE_WORDS: u32 = 64;
/// Default firmware->host ring capacity in words
pub const DEFAULT_TO_HOST_WORDS: u32 = 64;

/// Local RAM offset of the host->firmware ring
const TO_FIRMWARE_OFFSET: u32 = 0x0100;
/// Local RAM offset of the firmware->host ring
const TO_HOST_OFFSET: u32 = 0x0400;

/// The firmware side of the host/firmware rings
#[derive(Debug)]
pub struct FirmwareSide<R> {
    io: R,
    abi: FirmwareAbi,
    inbox: RingChannel,
    outbox: RingChannel,
}

impl<R: RegisterIo> FirmwareSide<R> {
    /// Attach to `io`, programming both rings with the default geometry
    pub fn new(io: R, abi: FirmwareAbi) -> Self {
        let sim = Self {
            io,
            abi,
            inbox: RingChannel::to_firmware(),
            outbox: RingChannel::to_host(),
        };
        sim.install(DEFAULT_TO_FIRMWARE_WORDS, DEFAULT_TO_HOST_WORDS);
        sim
    }

    /// Program ring geometry and rewind every index
    pub fn install(&self, to_firmware_words: u32, to_host_words: u32) {
        self.io.write32(
            regs::COMMS_TO_MTX_BUF_SIZE,
            RingGeometry::encode(to_firmware_words, TO_FIRMWARE_OFFSET),
        );
        self.io.write32(
            regs::COMMS_TO_HOST_BUF_SIZE,
            RingGeometry::encode(to_host_words, TO_HOST_OFFSET),
        );
        self.rewind(0);
    }

    /// Place every index of both rings at `index`
    pub fn rewind(&self, index: u32) {
        for reg in [
            regs::COMMS_TO_MTX_RD_INDEX,
            regs::COMMS_TO_MTX_WRT_INDEX,
            regs::COMMS_TO_HOST_RD_INDEX,
            regs::COMMS_TO_HOST_WRT_INDEX,
        ] {
            self.io.write32(reg, index);
        }
    }

    /// Register access shared with the host
    pub fn io(&self) -> &R {
        &self.io
    }

    /// Take the next host command, skipping padding
    pub fn pop_command(&self) -> Result<Option<MessageWords>> {
        while let Some(words) = self.inbox.dequeue_one(&self.io)? {
            let header = words.first().copied().map(Header::from_word);
            if header.is_some_and(|h| !h.is_padding()) {
                return Ok(Some(words));
            }
        }
        Ok(None)
    }

    /// Drain every pending host command, returning their ids in order
    pub fn drain_command_ids(&self) -> Result<ArrayVec<u32, 32>> {
        let mut ids = ArrayVec::new();
        while let Some(words) = self.pop_command()? {
            if let Some(&first) = words.first() {
                if ids.try_push(Header::from_word(first).id).is_err() {
                    break;
                }
            }
        }
        Ok(ids)
    }

    /// Post a reply and raise the MTX interrupt
    pub fn post(&self, message: FirmwareMessage) -> Result<()> {
        self.post_words(&message.encode(self.abi))
    }

    /// Post raw words and raise the MTX interrupt
    pub fn post_words(&self, words: &[u32]) -> Result<()> {
        self.outbox.enqueue(&self.io, words)?;
        self.raise(InterruptStatus::MTX);
        Ok(())
    }

    /// Set interrupt status bits
    pub fn raise(&self, status: InterruptStatus) {
        self.io
            .write32_masked(regs::INTERRUPT_STATUS, status.bits(), status.bits());
    }

    /// Report the hardware idle bit in the firmware status word
    pub fn set_hw_idle(&self, idle: bool) {
        let value = if idle { regs::FW_STATUS_HW_IDLE } else { 0 };
        self.io
            .write32_masked(regs::COMMS_FW_STATUS, value, regs::FW_STATUS_HW_IDLE);
    }
}
