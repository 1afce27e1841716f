//! Statistics from the most recent garbage collection.

use std::cell::Cell;
use std::time::Duration;

/// Snapshot of the calling thread's last collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the sweep.
    pub duration: Duration,
    /// Blocks moved off the managed list.
    pub blocks_reclaimed: usize,
    /// Blocks still live after the sweep.
    pub blocks_surviving: usize,
    /// Page groups handed back to the central heap.
    pub groups_released: usize,
    /// Collections this thread has run since it first allocated.
    pub total_collections: usize,
}

impl GcMetrics {
    /// Creates a `GcMetrics` with all fields zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            blocks_reclaimed: 0,
            blocks_surviving: 0,
            groups_released: 0,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static LAST_GC: Cell<GcMetrics> = const { Cell::new(GcMetrics::new()) };
}

/// Returns the calling thread's metrics from its most recent
/// [`garbage_collect`](crate::garbage_collect); all-zero before the
/// first one.
#[must_use]
pub fn last_gc_metrics() -> GcMetrics {
    LAST_GC.with(Cell::get)
}

pub(crate) fn record_collection(
    blocks_reclaimed: usize,
    blocks_surviving: usize,
    groups_released: usize,
    duration: Duration,
) {
    // try_with: the final sweep in the heap's Drop can run after this
    // thread-local is already gone.
    let _ = LAST_GC.try_with(|cell| {
        let total_collections = cell.get().total_collections + 1;
        cell.set(GcMetrics {
            duration,
            blocks_reclaimed,
            blocks_surviving,
            groups_released,
            total_collections,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_counted_per_thread() {
        let before = last_gc_metrics();
        assert_eq!(before.total_collections, 0);

        record_collection(3, 2, 1, Duration::from_micros(5));
        let after = last_gc_metrics();
        assert_eq!(after.total_collections, 1);
        assert_eq!(after.blocks_reclaimed, 3);
        assert_eq!(after.blocks_surviving, 2);
        assert_eq!(after.groups_released, 1);
    }
}
