//! A tiered, thread-caching memory allocator with deferred reclamation.
//!
//! `gc-malloc` serves variable-size allocation requests from concurrent
//! threads through three cooperating layers:
//!
//! - **`ThreadHeap`** — a per-thread front-end with per-size-class free
//!   lists. Small allocations and the common path never take a lock.
//! - **`CentralHeap`** — a process-wide, mutex-protected page back-end. It
//!   owns 1 MiB OS-mapped *regions*, hands out *spans* (runs of 4 KiB
//!   pages), coalesces freed spans address-wise and eventually returns
//!   fully idle regions to the OS.
//! - **`MetadataPool`** — a slab recycling the fixed-size span descriptors
//!   so allocator bookkeeping never recurses into the allocator itself.
//!
//! # Deferred reclamation
//!
//! Freeing is a single atomic release-store of a `FREED` flag in the block
//! header, legal from *any* thread. Memory only becomes reusable when the
//! owning thread runs [`garbage_collect`], which sweeps its managed block
//! list with acquire-loads and moves reclaimed blocks back onto its free
//! lists. This replaces cross-thread free queues with one in-band flag;
//! the release/acquire pairing makes every write the freeing thread did
//! visible to the owner before the block is reused.
//!
//! # Quick start
//!
//! ```
//! let p = gc_malloc::allocate(64);
//! assert!(!p.is_null());
//! unsafe { gc_malloc::deallocate(p) };
//! gc_malloc::garbage_collect();
//! ```
//!
//! # Limits
//!
//! Returned pointers are 8-byte aligned; callers needing stricter
//! alignment must overallocate. A single request cannot exceed one region
//! (just under 1 MiB) and there is no `realloc`.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod bitmap;
mod block;
mod mapper;
mod metadata;
mod size_class;
mod thread_heap;
mod trace;

/// Page-level back-end internals.
///
/// Public for testing and advanced use cases; most users only need the
/// crate-root functions.
pub mod central;
/// Span descriptor types.
pub mod page_group;
/// Per-thread statistics of the most recent collection.
pub mod metrics;

pub use block::BLOCK_HEADER_SIZE;
pub use metrics::{last_gc_metrics, GcMetrics};
pub use thread_heap::{allocate, deallocate, garbage_collect};

/// Size of one allocator page in bytes.
///
/// This is an allocator constant, not the OS page size: all span
/// arithmetic happens at this granularity, while actual `mmap`/`munmap`
/// calls only ever operate on whole regions and are therefore valid for
/// any OS page size up to [`REGION_BYTES`].
pub const PAGE_SIZE: usize = 4096;

/// Number of pages in one OS-mapped region.
pub const PAGES_PER_REGION: usize = 256;

/// Bytes per region (1 MiB). Regions are the unit of mapping and
/// unmapping; spans never cross a region boundary.
pub const REGION_BYTES: usize = PAGES_PER_REGION * PAGE_SIZE;

const _: () = assert!(REGION_BYTES.is_power_of_two());
const _: () = assert!(PAGE_SIZE.is_power_of_two());

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static SERIAL: Mutex<()> = Mutex::new(());

    /// Serializes unit tests that assert on process-global singleton
    /// state (the metadata pool and the central heap).
    pub(crate) fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
