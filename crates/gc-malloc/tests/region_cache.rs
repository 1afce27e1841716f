//! Return-to-OS hysteresis: one fully idle region stays cached, a second
//! one goes back to the OS.
//!
//! These tests assert on exact region addresses, so they serialize on a
//! file-local lock and run in their own process.

use std::sync::{Mutex, MutexGuard, PoisonError};

use gc_malloc::central::{acquire_pages, release_pages};
use gc_malloc::{PAGES_PER_REGION, REGION_BYTES};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn one_idle_region_stays_warm() {
    let _guard = serial();

    let r1 = acquire_pages(PAGES_PER_REGION).expect("failed to acquire region 1");
    let r2 = acquire_pages(PAGES_PER_REGION).expect("failed to acquire region 2");

    let addr1 = unsafe { (*r1.as_ptr()).start };
    let addr2 = unsafe { (*r2.as_ptr()).start };
    assert_ne!(addr1, addr2);
    assert_eq!(addr1 as usize % REGION_BYTES, 0);
    assert_eq!(addr2 as usize % REGION_BYTES, 0);

    // r1 is the first whole idle region: it stays cached. Releasing r2
    // while r1 is cached sends r2 back to the OS.
    release_pages(r1.as_ptr());
    release_pages(r2.as_ptr());

    // The next region-sized demand is served from the cached r1, not a
    // fresh mapping.
    let again = acquire_pages(PAGES_PER_REGION).expect("failed to re-acquire a region");
    let addr_again = unsafe { (*again.as_ptr()).start };
    assert_eq!(addr_again, addr1, "cached region was not reused");

    release_pages(again.as_ptr());
}

#[test]
fn lone_region_does_not_oscillate() {
    let _guard = serial();

    // With at most one idle region in the pool, a free/demand pair at
    // region granularity must be served from the cache every time.
    let first = acquire_pages(PAGES_PER_REGION).expect("failed to acquire a region");
    let addr = unsafe { (*first.as_ptr()).start };
    release_pages(first.as_ptr());

    for _ in 0..10 {
        let g = acquire_pages(PAGES_PER_REGION).expect("failed to re-acquire the region");
        assert_eq!(
            unsafe { (*g.as_ptr()).start },
            addr,
            "lone idle region was unmapped and remapped"
        );
        release_pages(g.as_ptr());
    }
}
