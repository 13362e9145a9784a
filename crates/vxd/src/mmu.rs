//! # MMU Context
//!
//! Page-table directory stamped into every decode command, and the
//! pending translation-cache invalidate raised by the page-table code.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Decoder MMU state shared with the page-table code
#[derive(Debug, Default)]
pub struct MmuContext {
    page_directory: AtomicU32,
    invalidate_pending: AtomicBool,
}

impl MmuContext {
    /// Create a context for `page_directory`
    pub const fn new(page_directory: u32) -> Self {
        Self {
            page_directory: AtomicU32::new(page_directory),
            invalidate_pending: AtomicBool::new(false),
        }
    }

    /// Current page-table directory address
    pub fn page_directory(&self) -> u32 {
        self.page_directory.load(Ordering::Acquire)
    }

    /// Switch to a new page-table directory
    pub fn set_page_directory(&self, page_directory: u32) {
        self.page_directory.store(page_directory, Ordering::Release);
    }

    /// Ask the next decode command to flush the translation cache
    pub fn request_invalidate(&self) {
        self.invalidate_pending.store(true, Ordering::Release);
    }

    /// Check if an invalidate is waiting for a command
    pub fn is_invalidate_pending(&self) -> bool {
        self.invalidate_pending.load(Ordering::Acquire)
    }

    /// Claim the pending invalidate; only one caller ever wins it
    pub fn take_invalidate(&self) -> bool {
        self.invalidate_pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
