//! # Command Queue
//!
//! Command buffers that arrived while the decoder was busy, in arrival
//! order. Entries own a copy of the client bytes, so the client may reuse
//! its buffer as soon as submission returns.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use vxd_core::{Error, Result, Seqno};

// =============================================================================
// PENDING COMMAND
// =============================================================================

/// A validated, patched command buffer waiting for the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Owned command bytes
    pub payload: Vec<u8>,
    /// Fence assigned at submission
    pub fence: Seqno,
}

impl PendingCommand {
    /// Copy `bytes` into a new entry
    ///
    /// Allocation failure is reported as [`Error::OutOfMemory`].
    pub fn copy_from(bytes: &[u8], fence: Seqno) -> Result<Self> {
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        payload.extend_from_slice(bytes);
        Ok(Self { payload, fence })
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

// =============================================================================
// COMMAND QUEUE
// =============================================================================

/// FIFO of pending commands
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<PendingCommand>,
    /// Maximum entries (0 = unbounded)
    max_depth: usize,
}

impl CommandQueue {
    /// Create an empty queue
    pub const fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_depth,
        }
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if one more entry would be accepted by the depth limit
    pub fn has_room(&self) -> bool {
        self.max_depth == 0 || self.entries.len() < self.max_depth
    }

    /// Append an entry
    ///
    /// On failure the queue is unchanged and the entry is dropped.
    pub fn push_back(&mut self, entry: PendingCommand) -> Result<()> {
        if !self.has_room() {
            log::warn!(
                "VXD: queue full ({} entries), rejecting fence {}",
                self.entries.len(),
                entry.fence
            );
            return Err(Error::OutOfMemory);
        }
        self.entries
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory)?;
        self.entries.push_back(entry);
        Ok(())
    }

    /// Remove the oldest entry
    pub fn pop_front(&mut self) -> Option<PendingCommand> {
        self.entries.pop_front()
    }

    /// Take every entry, leaving the queue empty
    pub fn take_all(&mut self) -> VecDeque<PendingCommand> {
        core::mem::take(&mut self.entries)
    }

    /// Fences of the queued entries, oldest first
    pub fn fences(&self) -> impl Iterator<Item = Seqno> + '_ {
        self.entries.iter().map(|e| e.fence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fence: u32) -> PendingCommand {
        PendingCommand::copy_from(&fence.to_le_bytes(), Seqno::new(fence)).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = CommandQueue::new(0);
        for fence in [7, 3, 9, 1] {
            queue.push_back(entry(fence)).unwrap();
        }
        let order: Vec<u32> = core::iter::from_fn(|| queue.pop_front())
            .map(|e| e.fence.raw())
            .collect();
        assert_eq!(order, [7, 3, 9, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_depth_limit_leaves_queue_unchanged() {
        let mut queue = CommandQueue::new(2);
        queue.push_back(entry(1)).unwrap();
        queue.push_back(entry(2)).unwrap();
        assert!(!queue.has_room());

        assert_eq!(queue.push_back(entry(3)), Err(Error::OutOfMemory));
        assert_eq!(queue.len(), 2);
        assert!(queue.fences().eq([Seqno::new(1), Seqno::new(2)]));
    }

    #[test]
    fn test_copy_owns_bytes() {
        let mut client = [1u8, 2, 3, 4];
        let pending = PendingCommand::copy_from(&client, Seqno::new(5)).unwrap();
        client[0] = 0xFF;
        assert_eq!(pending.payload, [1, 2, 3, 4]);
        assert_eq!(pending.size(), 4);
    }

    #[test]
    fn test_take_all_empties() {
        let mut queue = CommandQueue::new(0);
        queue.push_back(entry(1)).unwrap();
        queue.push_back(entry(2)).unwrap();

        let taken = queue.take_all();
        assert_eq!(taken.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop_front().is_none());
    }
}
