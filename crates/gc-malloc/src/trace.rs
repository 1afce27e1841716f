//! Structured tracing for allocator events.
//!
//! When the `tracing` feature is enabled, this module emits a span per
//! GC sweep and events for class refills and region map/unmap traffic.
//! With the feature off, every call compiles to nothing.

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use tracing::{span, Level};

    /// Span covering one GC sweep of the calling thread.
    pub fn collection_span() -> span::EnteredSpan {
        span!(Level::DEBUG, "heap_gc").entered()
    }

    /// Result of one GC sweep.
    pub fn log_collection_end(reclaimed: usize, surviving: usize, groups_released: usize) {
        tracing::debug!(reclaimed, surviving, groups_released, "gc_sweep_end");
    }

    /// A size class pulled a fresh span and carved it.
    pub fn log_refill(class_index: usize, block_size: usize, blocks: usize) {
        tracing::trace!(class_index, block_size, blocks, "class_refill");
    }

    /// A fresh region was mapped from the OS.
    pub fn log_region_mapped(addr: usize, bytes: usize) {
        tracing::debug!(addr, bytes, "region_mapped");
    }

    /// A fully idle region was returned to the OS.
    pub fn log_region_unmapped(addr: usize, bytes: usize) {
        tracing::debug!(addr, bytes, "region_unmapped");
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) mod internal {
    /// Stub span guard when tracing is disabled.
    pub struct EnteredSpan;

    pub fn collection_span() -> EnteredSpan {
        EnteredSpan
    }

    pub fn log_collection_end(_reclaimed: usize, _surviving: usize, _groups_released: usize) {}

    pub fn log_refill(_class_index: usize, _block_size: usize, _blocks: usize) {}

    pub fn log_region_mapped(_addr: usize, _bytes: usize) {}

    pub fn log_region_unmapped(_addr: usize, _bytes: usize) {}
}
