//! Per-block header: the one word any thread may write.
//!
//! Every allocated block is preceded by a 24-byte header. The `state`
//! word carries the deferred-free protocol: deallocation from any thread
//! is a release-store of [`STATE_FREED`], and the owning thread's GC
//! sweep observes it with an acquire-load before reclaiming the block.
//! `owner_group` and `next` are owner-thread-only.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::page_group::PageGroup;

/// Block is reachable through a free list or awaiting reclamation.
pub(crate) const STATE_FREED: usize = 0;
/// Block is handed out to the caller.
pub(crate) const STATE_IN_USE: usize = 1;

/// Header prepended to every block.
#[repr(C)]
pub struct BlockHeader {
    pub(crate) state: AtomicUsize,
    pub(crate) owner_group: *mut PageGroup,
    pub(crate) next: *mut BlockHeader,
}

/// Size of the per-block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

#[cfg(target_pointer_width = "64")]
const _: () = assert!(BLOCK_HEADER_SIZE == 24);

impl BlockHeader {
    /// Recovers the header from the pointer handed to the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` and not yet reclaimed.
    #[inline]
    pub(crate) unsafe fn from_user_ptr(ptr: *mut u8) -> *mut BlockHeader {
        unsafe { ptr.cast::<BlockHeader>().sub(1) }
    }

    /// Returns the caller-visible pointer just past the header.
    #[inline]
    pub(crate) fn user_ptr(header: *mut BlockHeader) -> *mut u8 {
        unsafe { header.add(1) }.cast::<u8>()
    }

    /// Acquire-loads the state; pairs with the release in `deallocate`.
    #[inline]
    pub(crate) fn is_freed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_FREED
    }

    /// Marks the block live. Owner-only store; publication of the block
    /// to other threads rides the caller's own synchronization.
    #[inline]
    pub(crate) fn mark_in_use(&self) {
        self.state.store(STATE_IN_USE, Ordering::Relaxed);
    }
}
