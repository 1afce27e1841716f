//! Coalescing behaviour, observed through the public API only.
//!
//! This file holds a single test so it runs alone in a fresh process
//! with a pristine central heap — the assertions depend on exact span
//! addresses.

use gc_malloc::central::{acquire_pages, release_pages};
use gc_malloc::PAGE_SIZE;

#[test]
fn adjacent_spans_merge_back_together() {
    // Carve one 32-page span out of a fresh region, then return it so the
    // pool holds a contiguous 32-page run at a known address.
    let span_c = acquire_pages(32).expect("failed to acquire the initial span");
    let base = unsafe { (*span_c.as_ptr()).start };
    release_pages(span_c.as_ptr());

    // Re-acquire it as three consecutive spans: a | b | d.
    let size_a = 10;
    let size_b = 12;
    let size_d = 32 - size_a - size_b;

    let span_a = acquire_pages(size_a).expect("failed to acquire span a");
    let span_b = acquire_pages(size_b).expect("failed to acquire span b");
    let span_d = acquire_pages(size_d).expect("failed to acquire span d");

    let addr_a = unsafe { (*span_a.as_ptr()).start };
    let addr_b = unsafe { (*span_b.as_ptr()).start };

    assert_eq!(addr_a, base, "span a did not come from the start of the run");
    assert_eq!(
        addr_b as usize,
        addr_a as usize + size_a * PAGE_SIZE,
        "span b is not adjacent to span a"
    );

    // Free a and b while d pins the tail. The two must merge into one
    // 22-page span, so a 22-page request is served at a's address.
    release_pages(span_a.as_ptr());
    release_pages(span_b.as_ptr());

    let merged = acquire_pages(size_a + size_b).expect("no span of the merged size available");
    unsafe {
        assert_eq!(
            (*merged.as_ptr()).start,
            addr_a,
            "merged span does not start where span a did"
        );
        assert_eq!((*merged.as_ptr()).page_count, size_a + size_b);
    }

    release_pages(merged.as_ptr());
    release_pages(span_d.as_ptr());
}
