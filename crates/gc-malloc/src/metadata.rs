//! Slab pool for page-group descriptors.
//!
//! Descriptors cannot come from the allocator they describe, so they get
//! their own singleton slab specialized to one object size. Freed slots
//! go on a LIFO in-place free list; an empty list refills by mapping a
//! 1 MiB aligned chunk and threading its slots. Chunks are linked into an
//! owned list via a small header and never returned to the OS —
//! descriptors are tiny and bounded in count, so the pool only grows to
//! the high-water mark.

use std::ptr::{self, NonNull};

use parking_lot::Mutex;

use crate::mapper;
use crate::page_group::PageGroup;

const CHUNK_BYTES: usize = 1024 * 1024;
const SLOT_SIZE: usize = std::mem::size_of::<PageGroup>();

// A free slot stores the next-pointer in place, so slots must hold at
// least a pointer; slot threading below preserves descriptor alignment.
const _: () = assert!(SLOT_SIZE >= std::mem::size_of::<*mut u8>());
const _: () = assert!(SLOT_SIZE % std::mem::align_of::<PageGroup>() == 0);

struct ChunkHeader {
    next: *mut ChunkHeader,
}

const SLOT_OFFSET: usize = {
    let align = std::mem::align_of::<PageGroup>();
    (std::mem::size_of::<ChunkHeader>() + align - 1) & !(align - 1)
};

struct FreeSlot {
    next: *mut FreeSlot,
}

struct PoolInner {
    free_list: *mut FreeSlot,
    chunk_list: *mut ChunkHeader,
    allocated_objects: usize,
    chunks_acquired: usize,
}

unsafe impl Send for PoolInner {}

static POOL: Mutex<PoolInner> = Mutex::new(PoolInner {
    free_list: ptr::null_mut(),
    chunk_list: ptr::null_mut(),
    allocated_objects: 0,
    chunks_acquired: 0,
});

/// Returns a slot of uninitialized `PageGroup` storage, or `None` when a
/// needed chunk mapping fails.
pub(crate) fn allocate() -> Option<NonNull<PageGroup>> {
    let mut pool = POOL.lock();

    if pool.free_list.is_null() {
        refill_locked(&mut pool)?;
    }
    debug_assert!(!pool.free_list.is_null());

    let slot = pool.free_list;
    pool.free_list = unsafe { (*slot).next };
    pool.allocated_objects += 1;

    NonNull::new(slot.cast::<PageGroup>())
}

/// Returns a descriptor slot to the pool.
pub(crate) fn deallocate(group: NonNull<PageGroup>) {
    let slot = group.as_ptr().cast::<FreeSlot>();

    let mut pool = POOL.lock();
    unsafe { (*slot).next = pool.free_list };
    pool.free_list = slot;
    pool.allocated_objects -= 1;
}

fn refill_locked(pool: &mut PoolInner) -> Option<()> {
    let chunk = mapper::allocate_aligned(CHUNK_BYTES)?;
    pool.chunks_acquired += 1;

    let header = chunk.as_ptr().cast::<ChunkHeader>();
    unsafe { (*header).next = pool.chunk_list };
    pool.chunk_list = header;

    let base = chunk.as_ptr() as usize;
    let mut current = base + SLOT_OFFSET;
    while current + SLOT_SIZE <= base + CHUNK_BYTES {
        let slot = current as *mut FreeSlot;
        unsafe { (*slot).next = pool.free_list };
        pool.free_list = slot;
        current += SLOT_SIZE;
    }

    Some(())
}

/// Snapshot of (live descriptors, chunks mapped), for tests.
#[cfg(test)]
pub(crate) fn stats() -> (usize, usize) {
    let pool = POOL.lock();
    (pool.allocated_objects, pool.chunks_acquired)
}
