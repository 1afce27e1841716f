//! Cross-thread free: any thread may mark a block freed, and the owning
//! thread's next sweep reclaims it.

use std::sync::mpsc;
use std::thread;

use gc_malloc::{allocate, deallocate, garbage_collect};

#[test]
fn remote_free_is_reclaimed_by_owner_gc() {
    let (ptr_tx, ptr_rx) = mpsc::channel::<usize>();
    let (freed_tx, freed_rx) = mpsc::channel::<()>();

    let owner = thread::spawn(move || {
        let p = allocate(128);
        assert!(!p.is_null());
        ptr_tx.send(p as usize).expect("send failed");

        // Wait until the other thread has actually freed the block, then
        // sweep: the block must come back as the next same-class pop.
        freed_rx.recv().expect("recv failed");
        garbage_collect();

        let q = allocate(128);
        assert_eq!(p, q, "remotely freed block was not reclaimed");
        unsafe { deallocate(q) };
        garbage_collect();
    });

    let freeer = thread::spawn(move || {
        let p = ptr_rx.recv().expect("recv failed") as *mut u8;
        unsafe { deallocate(p) };
        freed_tx.send(()).expect("send failed");
    });

    owner.join().expect("owner thread panicked");
    freeer.join().expect("freeing thread panicked");
}

#[test]
fn remote_writes_are_visible_to_the_owner_after_gc() {
    let (ptr_tx, ptr_rx) = mpsc::channel::<usize>();
    let (freed_tx, freed_rx) = mpsc::channel::<()>();

    let owner = thread::spawn(move || {
        let p = allocate(64);
        assert!(!p.is_null());
        ptr_tx.send(p as usize).expect("send failed");

        freed_rx.recv().expect("recv failed");
        garbage_collect();

        // Reclaimed block comes straight back; the freeing thread's
        // writes must be visible through the release/acquire pairing.
        let q = allocate(64);
        assert_eq!(p, q);
        unsafe { assert_eq!(q.read_volatile(), 0x77) };
        unsafe { deallocate(q) };
        garbage_collect();
    });

    let freeer = thread::spawn(move || {
        let p = ptr_rx.recv().expect("recv failed") as *mut u8;
        unsafe {
            p.write_volatile(0x77);
            deallocate(p);
        }
        freed_tx.send(()).expect("send failed");
    });

    owner.join().expect("owner thread panicked");
    freeer.join().expect("freeing thread panicked");
}

#[test]
fn many_remote_frees_from_many_threads() {
    const BLOCKS: usize = 1024;
    const FREEERS: usize = 4;

    let (ptr_tx, ptr_rx) = mpsc::channel::<Vec<usize>>();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let owner = thread::spawn(move || {
        let pointers: Vec<usize> = (0..BLOCKS)
            .map(|_| {
                let p = allocate(256);
                assert!(!p.is_null());
                p as usize
            })
            .collect();

        // Fan the pointers out to the freeing threads in equal slices.
        for chunk in pointers.chunks(BLOCKS / FREEERS) {
            ptr_tx.send(chunk.to_vec()).expect("send failed");
        }

        for _ in 0..FREEERS {
            done_rx.recv().expect("recv failed");
        }
        garbage_collect();

        let metrics = gc_malloc::last_gc_metrics();
        assert_eq!(metrics.blocks_reclaimed, BLOCKS);
    });

    let freeers: Vec<_> = (0..FREEERS)
        .map(|_| {
            let slice = ptr_rx.recv().expect("recv failed");
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for p in slice {
                    unsafe { deallocate(p as *mut u8) };
                }
                done_tx.send(()).expect("send failed");
            })
        })
        .collect();

    owner.join().expect("owner thread panicked");
    for f in freeers {
        f.join().expect("freeing thread panicked");
    }
}
