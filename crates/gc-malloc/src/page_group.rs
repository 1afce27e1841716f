//! Span descriptors.
//!
//! A `PageGroup` describes a span currently assigned to some thread heap:
//! where it starts, how many pages it covers and how it is carved. The
//! descriptor lives in metadata-pool storage, never inside the span
//! itself, so it survives the span's contents being overwritten.

use crate::PAGE_SIZE;

/// How a group's span is carved into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    /// Carved into equal blocks of one size class; `block_size` includes
    /// the block header.
    Small {
        /// Total bytes per block, header included.
        block_size: usize,
    },
    /// Dedicated to a single oversized block spanning the whole group.
    Large,
}

/// Descriptor of a span owned by a thread heap.
#[repr(C)]
pub struct PageGroup {
    /// First byte of the span.
    pub start: *mut u8,
    /// Pages in the span.
    pub page_count: usize,
    /// How the span is carved.
    pub role: GroupRole,
    /// Number of blocks the span was carved into (1 for `Large`).
    pub total_blocks: usize,
    /// Blocks currently handed out to callers.
    pub in_use: usize,
}

impl PageGroup {
    /// Total bytes covered by the span.
    #[must_use]
    pub fn span_bytes(&self) -> usize {
        self.page_count * PAGE_SIZE
    }

    /// Whether `addr` falls inside the span.
    #[must_use]
    pub fn contains(&self, addr: *const u8) -> bool {
        let start = self.start as usize;
        let addr = addr as usize;
        addr >= start && addr < start + self.span_bytes()
    }
}
