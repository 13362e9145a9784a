//! # Submission Pipeline
//!
//! A command buffer is validated as a whole before anything is touched,
//! then patched with the fence and MMU state and either written to the
//! firmware ring straight away or copied into the command queue.

use vxd_core::{Error, FirmwareAbi, Result, Seqno, Violation, PAGE_SIZE};
use vxd_hal::{regs, RegisterIo};
use vxd_rpc::message::{self, deblock, id, render, DecodeFlags, Header};

use crate::device::Device;
use crate::fence::FailureReason;
use crate::mmu::MmuContext;
use crate::platform::{CommandMapper, FenceRegistry, Platform};
use crate::queue::PendingCommand;
use crate::recovery::NeedsReset;

// =============================================================================
// VALIDATION
// =============================================================================

/// Check a command buffer without modifying it
///
/// Every message must be well formed, of a submittable id, and exactly the
/// size of its layout. Nothing is sent unless the whole buffer passes.
pub fn validate(cmd: &[u8]) -> Result<()> {
    if cmd.len() > PAGE_SIZE {
        return Err(Error::CommandTooLarge);
    }
    if cmd.is_empty() {
        return Err(Error::MalformedMessage);
    }

    for item in message::envelopes(cmd) {
        let (offset, env) = item?;
        let expected = match env.id() {
            id::RENDER => render::SIZE,
            other if id::is_deblock(other) => deblock::SIZE,
            other => {
                log::debug!("VXD: unsupported message {:#04x} at {}", other, offset);
                return Err(Error::UnsupportedMessage(other));
            }
        };
        if env.len() != expected {
            log::debug!(
                "VXD: message {:#04x} has size {}, expected {}",
                env.id(),
                env.len(),
                expected
            );
            return Err(Error::MalformedMessage);
        }
    }
    Ok(())
}

// =============================================================================
// PATCHING
// =============================================================================

/// Values stamped into each command of one submission
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    /// Fence assigned to the submission
    pub fence: Seqno,
    /// Firmware layout
    pub abi: FirmwareAbi,
}

/// Stamp fence, page directory and MMU invalidate into a validated buffer
///
/// The pending MMU invalidate is claimed by the first message that can
/// carry it; returns whether this buffer claimed it. On error a claimed
/// invalidate is handed back to the MMU context.
pub fn patch(cmd: &mut [u8], stamp: Stamp, mmu: &MmuContext) -> Result<bool> {
    let mut claimed = false;
    let result = patch_all(cmd, stamp, mmu, &mut claimed);
    if result.is_err() && claimed {
        mmu.request_invalidate();
    }
    result.map(|()| claimed)
}

fn patch_all(cmd: &mut [u8], stamp: Stamp, mmu: &MmuContext, claimed: &mut bool) -> Result<()> {
    let mut offset = 0;
    while offset < cmd.len() {
        let msg = &mut cmd[offset..];
        let header = message::read_header(msg)?;
        let msg = msg
            .get_mut(..header.size as usize)
            .ok_or(Error::MalformedMessage)?;
        *claimed |= match header.id {
            id::RENDER => patch_render(msg, stamp, mmu)?,
            other if id::is_deblock(other) => patch_deblock(msg, stamp, mmu)?,
            other => return Err(Error::UnsupportedMessage(other)),
        };
        offset += header.size as usize;
    }
    Ok(())
}

fn patch_render(msg: &mut [u8], stamp: Stamp, mmu: &MmuContext) -> Result<bool> {
    let mut ptd = mmu.page_directory();
    let invalidate = mmu.take_invalidate();

    match stamp.abi {
        FirmwareAbi::Classic => {
            message::write_field(msg, render::FENCE, stamp.fence.raw())?;
            if invalidate {
                ptd |= 1;
            }
        }
        FirmwareAbi::Deva => {
            message::write_field(msg, render::MSG_ID, stamp.fence.raw())?;
            if invalidate {
                let flags = DecodeFlags::from_bits_retain(message::read_field(msg, render::FLAGS)?)
                    | DecodeFlags::INVALIDATE_MMU;
                message::write_field(msg, render::FLAGS, flags.bits())?;
            }
            // Low byte of the submitted value is the client's MMU context
            let context = message::read_field(msg, render::MMU_PTD)? & 0xFF;
            ptd |= context;
        }
    }
    message::write_field(msg, render::MMU_PTD, ptd)?;

    if invalidate {
        log::debug!("VXD: MMU invalidate on fence {}", stamp.fence);
    }
    Ok(invalidate)
}

fn patch_deblock(msg: &mut [u8], stamp: Stamp, mmu: &MmuContext) -> Result<bool> {
    let ptd = mmu.page_directory();
    let invalidate = mmu.take_invalidate();
    if invalidate {
        let flags = DecodeFlags::from_bits_retain(message::read_field(msg, deblock::FLAGS)?)
            | DecodeFlags::INVALIDATE_MMU;
        message::write_field(msg, deblock::FLAGS, flags.bits())?;
        log::debug!("VXD: MMU invalidate on deblock fence {}", stamp.fence);
    }

    message::write_header(msg, Header::new(deblock::SIZE as u32, id::DEBLOCK))?;
    message::write_field(msg, deblock::FENCE, stamp.fence.raw())?;
    message::write_field(msg, deblock::MMU_PTD, ptd >> 8)?;
    Ok(invalidate)
}

// =============================================================================
// DEVICE SUBMISSION
// =============================================================================

impl<R, P, F> Device<R, P, F>
where
    R: RegisterIo,
    P: Platform,
    F: FenceRegistry,
{
    /// Submit a command buffer under `fence`
    ///
    /// The buffer is patched in place when it goes straight to the ring.
    /// When the decoder is busy a patched copy is queued instead.
    pub fn submit_command(&self, cmd: &mut [u8], fence: Seqno) -> Result<()> {
        validate(cmd)?;
        self.prepare_submission()?;

        let stamp = Stamp {
            fence,
            abi: self.config.abi,
        };

        if self.try_claim() {
            if let Err(e) = patch(cmd, stamp, &self.mmu) {
                self.lock_state().busy = false;
                return Err(e);
            }
            log::debug!("VXD: sending fence {} to idle decoder", fence);
            return self.send_fenced(cmd, fence);
        }

        if !self.lock_state().queue.has_room() {
            log::warn!("VXD: queue limit reached, rejecting fence {}", fence);
            return Err(Error::OutOfMemory);
        }
        let mut entry = PendingCommand::copy_from(cmd, fence)?;
        let invalidated = patch(&mut entry.payload, stamp, &self.mmu)?;
        self.queue_or_send(entry, invalidated)
    }

    /// Queue a patched copy, or send it if the decoder went idle meanwhile
    ///
    /// `invalidated` says the copy carries the MMU invalidate; it is handed
    /// back if the copy cannot be queued.
    pub(crate) fn queue_or_send(&self, entry: PendingCommand, invalidated: bool) -> Result<()> {
        let mut state = self.lock_state();
        if !state.busy {
            state.busy = true;
            drop(state);
            log::debug!("VXD: decoder went idle, sending fence {} directly", entry.fence);
            return self.send_fenced(&entry.payload, entry.fence);
        }

        let fence = entry.fence;
        if let Err(e) = state.queue.push_back(entry) {
            drop(state);
            if invalidated {
                self.mmu.request_invalidate();
            }
            return Err(e);
        }
        self.tracker.record_submitted(fence);
        log::debug!(
            "VXD: queued fence {} ({} pending)",
            fence,
            state.queue.len()
        );
        Ok(())
    }

    /// Map a client buffer and submit it
    ///
    /// `offset` and `size` locate the commands inside the buffer; they may
    /// not cross a page boundary.
    pub fn submit_mapped<M: CommandMapper>(
        &self,
        mapper: &M,
        handle: &M::Handle,
        offset: usize,
        size: usize,
        fence: Seqno,
    ) -> Result<()> {
        let page_offset = offset % PAGE_SIZE;
        if size > PAGE_SIZE || page_offset + size > PAGE_SIZE {
            return Err(Error::CommandTooLarge);
        }

        let mut mapping = mapper.map_page(handle, offset / PAGE_SIZE).map_err(|e| {
            log::error!("VXD: failed to map command buffer: {}", e);
            Error::MapFailed
        })?;
        let cmd = mapping
            .get_mut(page_offset..page_offset + size)
            .ok_or(Error::MapFailed)?;
        self.submit_command(cmd, fence)
    }

    /// Take the busy flag if the decoder is idle
    fn try_claim(&self) -> bool {
        let mut state = self.lock_state();
        if state.busy {
            false
        } else {
            state.busy = true;
            true
        }
    }

    /// Write every message of a patched buffer to the firmware ring
    pub(crate) fn send(&self, cmd: &[u8]) -> Result<()> {
        self.io.write32(regs::MAN_CLK_ENABLE, regs::CLK_ENABLE_ALL);
        for item in message::envelopes(cmd) {
            let (_, env) = item?;
            let words = message::to_words(env.as_bytes())?;
            self.to_firmware.enqueue(&self.io, &words)?;
            // Flush the doorbell write
            let _ = self.io.read32(regs::INTERRUPT_STATUS);
        }
        Ok(())
    }

    /// Record `fence` as submitted and send while holding the busy flag
    ///
    /// On failure the fence is withdrawn, the busy flag released and every
    /// queued command failed; the device then needs a reset.
    fn send_fenced(&self, cmd: &[u8], fence: Seqno) -> Result<()> {
        let previous = self.tracker.record_submitted(fence);
        self.send_claimed(cmd).map_err(|e| {
            self.tracker.withdraw(fence, previous);
            self.abandon(NeedsReset::Generic, None);
            e
        })
    }

    /// Send while holding the busy flag
    ///
    /// The busy flag guarantees the ring had room, so running out of space
    /// here is a protocol violation. The caller must release the busy flag
    /// and leave the device needing a reset on failure.
    fn send_claimed(&self, cmd: &[u8]) -> Result<()> {
        self.send(cmd).map_err(|e| {
            let e = match e {
                Error::ChannelFull => Error::ProtocolViolation(Violation::ChannelFullWhileIdle),
                other => other,
            };
            log::error!("VXD: send failed while holding the decoder: {}", e);
            e
        })
    }

    /// Send the oldest queued command, or release the busy flag
    ///
    /// Runs from the completion handler. A command that cannot be sent is
    /// failed through the fence registry along with everything behind it.
    pub(crate) fn dequeue_send(&self) {
        let entry = {
            let mut state = self.lock_state();
            match state.queue.pop_front() {
                Some(entry) => entry,
                None => {
                    log::trace!("VXD: queue empty, decoder idle");
                    state.busy = false;
                    return;
                }
            }
        };

        log::debug!("VXD: dequeued fence {}", entry.fence);
        if self.send_claimed(&entry.payload).is_err() {
            self.fences.fail(entry.fence, FailureReason::SendFailed);
            self.abandon(NeedsReset::Generic, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vxd_rpc::message::{read_field, write_field, write_header};

    fn render_cmd() -> [u8; render::SIZE] {
        let mut buf = [0u8; render::SIZE];
        write_header(&mut buf, Header::new(render::SIZE as u32, id::RENDER)).unwrap();
        buf
    }

    fn deblock_cmd(msg_id: u32) -> [u8; deblock::SIZE] {
        let mut buf = [0u8; deblock::SIZE];
        write_header(&mut buf, Header::new(deblock::SIZE as u32, msg_id)).unwrap();
        buf
    }

    fn classic(fence: u32) -> Stamp {
        Stamp {
            fence: Seqno::new(fence),
            abi: FirmwareAbi::Classic,
        }
    }

    #[test]
    fn test_validate_accepts_render_and_deblock() {
        let mut buf = [0u8; render::SIZE + deblock::SIZE];
        buf[..render::SIZE].copy_from_slice(&render_cmd());
        buf[render::SIZE..].copy_from_slice(&deblock_cmd(id::OOLD_MFLD));
        assert_eq!(validate(&buf), Ok(()));
    }

    #[test]
    fn test_validate_rejects_unsupported_anywhere() {
        let mut buf = [0u8; render::SIZE + 8];
        buf[..render::SIZE].copy_from_slice(&render_cmd());
        write_header(&mut buf[render::SIZE..], Header::new(8, id::CMD_COMPLETED)).unwrap();
        assert_eq!(
            validate(&buf),
            Err(Error::UnsupportedMessage(id::CMD_COMPLETED))
        );
    }

    #[test]
    fn test_validate_size_rules() {
        assert_eq!(validate(&[]), Err(Error::MalformedMessage));
        assert_eq!(validate(&[0u8; PAGE_SIZE + 4]), Err(Error::CommandTooLarge));

        let mut short = [0u8; 24];
        write_header(&mut short, Header::new(24, id::RENDER)).unwrap();
        assert_eq!(validate(&short), Err(Error::MalformedMessage));

        let mut unaligned = render_cmd();
        write_header(&mut unaligned, Header::new(27, id::RENDER)).unwrap();
        assert_eq!(validate(&unaligned), Err(Error::MalformedMessage));
    }

    #[test]
    fn test_patch_render_classic() {
        let mmu = MmuContext::new(0x1234_5000);
        mmu.request_invalidate();
        let mut cmd = render_cmd();

        patch(&mut cmd, classic(5), &mmu).unwrap();
        assert_eq!(read_field(&cmd, render::FENCE), Ok(5));
        assert_eq!(read_field(&cmd, render::MMU_PTD), Ok(0x1234_5001));
        assert!(!mmu.is_invalidate_pending());

        // Invalidate was consumed by the first submission
        let mut again = render_cmd();
        patch(&mut again, classic(6), &mmu).unwrap();
        assert_eq!(read_field(&again, render::MMU_PTD), Ok(0x1234_5000));
    }

    #[test]
    fn test_patch_render_deva() {
        let mmu = MmuContext::new(0x1234_5000);
        mmu.request_invalidate();
        let mut cmd = render_cmd();
        write_field(&mut cmd, render::MMU_PTD, 0x42).unwrap();
        write_field(&mut cmd, render::FLAGS, 0x1).unwrap();

        let stamp = Stamp {
            fence: Seqno::new(9),
            abi: FirmwareAbi::Deva,
        };
        patch(&mut cmd, stamp, &mmu).unwrap();
        assert_eq!(read_field(&cmd, render::MSG_ID), Ok(9));
        assert_eq!(read_field(&cmd, render::FENCE), Ok(0));
        assert_eq!(read_field(&cmd, render::MMU_PTD), Ok(0x1234_5042));
        assert_eq!(
            read_field(&cmd, render::FLAGS),
            Ok(0x1 | DecodeFlags::INVALIDATE_MMU.bits())
        );
    }

    #[test]
    fn test_patch_deblock_rewrites_id() {
        let mmu = MmuContext::new(0x0ABC_DE00);
        for msg_id in [id::DEBLOCK_MFLD, id::OOLD_MFLD, id::DEBLOCK] {
            let mut cmd = deblock_cmd(msg_id);
            patch(&mut cmd, classic(11), &mmu).unwrap();
            assert_eq!(
                message::read_header(&cmd),
                Ok(Header::new(deblock::SIZE as u32, id::DEBLOCK))
            );
            assert_eq!(read_field(&cmd, deblock::FENCE), Ok(11));
            assert_eq!(read_field(&cmd, deblock::MMU_PTD), Ok(0x000A_BCDE));
            assert_eq!(read_field(&cmd, deblock::FLAGS), Ok(0));
        }

        mmu.request_invalidate();
        let mut cmd = deblock_cmd(id::DEBLOCK_MFLD);
        patch(&mut cmd, classic(12), &mmu).unwrap();
        assert_eq!(
            read_field(&cmd, deblock::FLAGS),
            Ok(DecodeFlags::INVALIDATE_MMU.bits())
        );
    }

    #[test]
    fn test_patch_error_returns_invalidate() {
        let mmu = MmuContext::new(0x2000_0000);
        mmu.request_invalidate();
        let mut buf = [0u8; render::SIZE + 8];
        buf[..render::SIZE].copy_from_slice(&render_cmd());
        write_header(&mut buf[render::SIZE..], Header::new(8, id::CMD_COMPLETED)).unwrap();

        assert_eq!(
            patch(&mut buf, classic(7), &mmu),
            Err(Error::UnsupportedMessage(id::CMD_COMPLETED))
        );
        assert!(mmu.is_invalidate_pending());

        let mut cmd = render_cmd();
        assert_eq!(patch(&mut cmd, classic(8), &mmu), Ok(true));
        assert_eq!(patch(&mut cmd, classic(9), &mmu), Ok(false));
    }
}
