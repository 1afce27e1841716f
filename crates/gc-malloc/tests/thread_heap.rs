//! Thread-heap behaviour: reuse after GC, the large path, refill, churn
//! and mixed-size concurrent allocation.

use std::collections::HashSet;
use std::sync::{Barrier, Mutex};
use std::thread;

use gc_malloc::{allocate, deallocate, garbage_collect, last_gc_metrics};

#[test]
fn small_block_is_reused_after_gc() {
    let size = 64;

    let p1 = allocate(size);
    assert!(!p1.is_null());
    unsafe { deallocate(p1) };

    garbage_collect();

    // The swept block sits at the head of its class list, so the next
    // same-class allocation must hand it straight back.
    let p2 = allocate(size);
    assert_eq!(p1, p2, "freed block was not recycled by the sweep");

    unsafe { deallocate(p2) };
    garbage_collect();
}

#[test]
fn returned_pointers_are_aligned() {
    for size in [0, 1, 8, 63, 64, 200, 4096, 40 * 1024] {
        let p = allocate(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0, "pointer for size {size} misaligned");
        unsafe { deallocate(p) };
    }
    garbage_collect();
}

#[test]
fn large_blocks_round_trip() {
    let size = 32 * 1024;

    let p1 = allocate(size);
    assert!(!p1.is_null());
    unsafe {
        // The whole request must be usable.
        p1.write_volatile(0x5A);
        p1.add(size - 1).write_volatile(0xA5);
        assert_eq!(p1.read_volatile(), 0x5A);
        assert_eq!(p1.add(size - 1).read_volatile(), 0xA5);
        deallocate(p1);
    }
    garbage_collect();

    let p2 = allocate(size);
    assert!(!p2.is_null(), "large allocation failed after GC");
    unsafe { deallocate(p2) };
    garbage_collect();
}

#[test]
fn oversize_request_fails_cleanly() {
    // More than one region (header included) cannot be served.
    let p = allocate(gc_malloc::REGION_BYTES);
    assert!(p.is_null());
}

#[test]
fn refill_keeps_up_under_pressure() {
    let size = 48;
    let mut pointers = Vec::with_capacity(500);
    let mut seen = HashSet::new();

    for i in 0..500 {
        let p = allocate(size);
        assert!(!p.is_null(), "allocation failed at iteration {i}");
        assert!(seen.insert(p as usize), "pointer handed out twice");
        pointers.push(p);
    }

    for p in pointers {
        unsafe { deallocate(p) };
    }
    garbage_collect();

    let metrics = last_gc_metrics();
    assert_eq!(metrics.blocks_reclaimed, 500);
}

#[test]
fn churn_cycles_reuse_memory() {
    const CYCLES: usize = 20;
    const ALLOCS_PER_CYCLE: usize = 1000;
    let size = 128;

    let first = allocate(size);
    assert!(!first.is_null());
    unsafe { deallocate(first) };
    garbage_collect();

    let reused = allocate(size);
    assert_eq!(first, reused, "failed to reuse a freshly freed block");

    let mut pointers = vec![reused];
    for cycle in 0..CYCLES {
        for _ in 1..ALLOCS_PER_CYCLE {
            let p = allocate(size);
            assert!(!p.is_null());
            pointers.push(p);
        }

        for p in pointers.drain(..) {
            unsafe { deallocate(p) };
        }
        garbage_collect();

        let p = allocate(size);
        assert!(!p.is_null(), "allocation failed after churn cycle {cycle}");
        pointers.push(p);
    }

    for p in pointers {
        unsafe { deallocate(p) };
    }
    garbage_collect();
}

#[test]
fn mixed_sizes_across_threads_yield_unique_pointers() {
    const TOTAL_BLOCKS: usize = 20_000;
    let sizes = [32usize, 64, 128, 256, 512, 1024];

    let num_threads = thread::available_parallelism().map_or(4, usize::from);
    let per_thread = TOTAL_BLOCKS.div_ceil(num_threads);

    let all_pointers = Mutex::new(HashSet::new());
    // Nobody frees until every thread has registered its pointers, so
    // all of them are live at once and must be pairwise distinct.
    let all_allocated = Barrier::new(num_threads);

    thread::scope(|scope| {
        for t in 0..num_threads {
            let all_pointers = &all_pointers;
            let all_allocated = &all_allocated;
            let sizes = &sizes;
            scope.spawn(move || {
                let mut rng = 0xD1B5_4A32_D192_ED03u64.wrapping_add(t as u64);
                let mut local = Vec::with_capacity(per_thread);

                for _ in 0..per_thread {
                    rng ^= rng << 13;
                    rng ^= rng >> 7;
                    rng ^= rng << 17;
                    let size = sizes[(rng % sizes.len() as u64) as usize];
                    let p = allocate(size);
                    assert!(!p.is_null());
                    local.push(p as usize);
                }

                {
                    let mut set = all_pointers.lock().unwrap();
                    for p in &local {
                        assert!(set.insert(*p), "duplicate pointer across threads");
                    }
                }
                all_allocated.wait();

                for p in local {
                    unsafe { deallocate(p as *mut u8) };
                }
                garbage_collect();
            });
        }
    });

    assert_eq!(
        all_pointers.into_inner().unwrap().len(),
        per_thread * num_threads
    );

    // The allocator is still healthy afterwards.
    let p = allocate(64);
    assert!(!p.is_null());
    unsafe { deallocate(p) };
    garbage_collect();
}
