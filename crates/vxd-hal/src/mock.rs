//! # Mock Register File
//!
//! In-memory [`RegisterIo`] for host-side tests. Unwritten registers read
//! as zero; every write is counted per offset so tests can check doorbells.

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::io::RegisterIo;

/// Register file backed by a map
#[derive(Debug, Default)]
pub struct MockRegisters {
    inner: Mutex<MockInner>,
}

#[derive(Debug, Default)]
struct MockInner {
    values: BTreeMap<u32, u32>,
    writes: BTreeMap<u32, usize>,
}

impl MockRegisters {
    /// Create an empty register file
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a register without counting it as a driver write
    pub fn poke(&self, offset: u32, value: u32) {
        self.inner.lock().values.insert(offset, value);
    }

    /// Read a register without side effects
    pub fn peek(&self, offset: u32) -> u32 {
        self.inner.lock().values.get(&offset).copied().unwrap_or(0)
    }

    /// Number of driver writes to `offset`
    pub fn write_count(&self, offset: u32) -> usize {
        self.inner.lock().writes.get(&offset).copied().unwrap_or(0)
    }

    /// Forget all write counters
    pub fn reset_counts(&self) {
        self.inner.lock().writes.clear();
    }
}

impl RegisterIo for MockRegisters {
    fn read32(&self, offset: u32) -> u32 {
        self.peek(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut inner = self.inner.lock();
        inner.values.insert(offset, value);
        *inner.writes.entry(offset).or_insert(0) += 1;
    }
}
