//! Per-thread allocation front-end.
//!
//! Each thread lazily gets one `ThreadHeap` holding per-size-class free
//! lists of blocks carved from central-heap spans, plus a managed list
//! threading every block the thread has handed out. Allocation and the
//! GC sweep are owner-thread-only and lock-free; only a refill or a span
//! release reaches into the central heap.

use std::cell::RefCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::block::{BlockHeader, BLOCK_HEADER_SIZE, STATE_FREED};
use crate::page_group::{GroupRole, PageGroup};
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::{central, metrics, PAGE_SIZE};

struct FreeList {
    head: *mut BlockHeader,
    count: usize,
}

/// Per-thread heap state. Reached through the thread-local handle; the
/// type itself is not exposed.
struct ThreadHeap {
    free_lists: [FreeList; NUM_SIZE_CLASSES],
    managed_head: *mut BlockHeader,
}

thread_local! {
    static THREAD_HEAP: RefCell<ThreadHeap> = RefCell::new(ThreadHeap::new());
}

/// Allocates at least `size` usable bytes.
///
/// Returns an 8-byte-aligned pointer preceded by a valid block header, or
/// null when memory is exhausted, when the request (header included)
/// exceeds one region, or when called during thread teardown after this
/// thread's heap is already gone.
pub fn allocate(size: usize) -> *mut u8 {
    THREAD_HEAP
        .try_with(|heap| heap.borrow_mut().allocate(size))
        .unwrap_or(ptr::null_mut())
}

/// Marks the block at `ptr` as freed.
///
/// Callable from *any* thread: this is a single release-store of the
/// freed flag — no locks, no list updates. The memory is actually
/// reclaimed by the owning thread's next [`garbage_collect`]. A null
/// `ptr` is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a pointer previously returned by [`allocate`]
/// that has not been freed since, and the caller must not touch the
/// block afterwards.
pub unsafe fn deallocate(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let header = unsafe { BlockHeader::from_user_ptr(ptr) };
    unsafe { (*header).state.store(STATE_FREED, Ordering::Release) };
}

/// Sweeps the calling thread's managed list, reclaiming every block
/// marked freed since the last sweep.
///
/// Small blocks go back to their size-class free list; a page group whose
/// blocks are all free again (beyond the one warm group kept per class)
/// is returned to the central heap, as is every dedicated large-block
/// group. A no-op during thread teardown.
pub fn garbage_collect() {
    let _ = THREAD_HEAP.try_with(|heap| heap.borrow_mut().garbage_collect());
}

impl ThreadHeap {
    fn new() -> Self {
        Self {
            free_lists: std::array::from_fn(|_| FreeList {
                head: ptr::null_mut(),
                count: 0,
            }),
            managed_head: ptr::null_mut(),
        }
    }

    fn allocate(&mut self, size: usize) -> *mut u8 {
        let block = match size_class::class_for_request(size) {
            Some(index) => self.allocate_small(index),
            None => self.allocate_large(size),
        };
        let Some(block) = block else {
            return ptr::null_mut();
        };

        unsafe {
            (*block.as_ptr()).mark_in_use();
            (*block.as_ptr()).next = self.managed_head;
        }
        self.managed_head = block.as_ptr();

        BlockHeader::user_ptr(block.as_ptr())
    }

    fn allocate_small(&mut self, index: usize) -> Option<NonNull<BlockHeader>> {
        if self.free_lists[index].head.is_null() {
            self.refill(index)?;
        }

        let list = &mut self.free_lists[index];
        let block = list.head;
        debug_assert!(!block.is_null());
        list.head = unsafe { (*block).next };
        list.count -= 1;
        unsafe { (*(*block).owner_group).in_use += 1 };

        NonNull::new(block)
    }

    fn allocate_large(&mut self, size: usize) -> Option<NonNull<BlockHeader>> {
        let total = size.checked_add(BLOCK_HEADER_SIZE)?;
        let num_pages = total.div_ceil(PAGE_SIZE);

        // The span itself becomes the block; the group stays dedicated to
        // it for the block's whole lifetime.
        let group = central::acquire_pages(num_pages)?;
        let block = unsafe {
            let g = group.as_ptr();
            (*g).role = GroupRole::Large;
            (*g).total_blocks = 1;
            (*g).in_use = 1;

            let block = (*g).start.cast::<BlockHeader>();
            (*block).owner_group = g;
            block
        };
        NonNull::new(block)
    }

    fn refill(&mut self, index: usize) -> Option<()> {
        debug_assert!(self.free_lists[index].head.is_null());

        let block_size = size_class::block_size(index);
        let num_pages = size_class::pages_to_acquire(index);

        let group = central::acquire_pages(num_pages)?;
        let g = group.as_ptr();

        let num_blocks = num_pages * PAGE_SIZE / block_size;
        let start = unsafe {
            (*g).role = GroupRole::Small { block_size };
            (*g).total_blocks = num_blocks;
            (*g).in_use = 0;
            (*g).start
        };

        // Carve the span into blocks threaded as a LIFO free list.
        let mut head: *mut BlockHeader = ptr::null_mut();
        for i in 0..num_blocks {
            let block = unsafe { start.add(i * block_size) }.cast::<BlockHeader>();
            unsafe {
                (*block).state.store(STATE_FREED, Ordering::Relaxed);
                (*block).owner_group = g;
                (*block).next = head;
            }
            head = block;
        }

        self.free_lists[index] = FreeList {
            head,
            count: num_blocks,
        };

        crate::trace::internal::log_refill(index, block_size, num_blocks);
        Some(())
    }

    fn garbage_collect(&mut self) {
        let started = Instant::now();
        let _span = crate::trace::internal::collection_span();

        let mut reclaimed = 0usize;
        let mut surviving = 0usize;
        let mut groups_released = 0usize;

        let mut prev: *mut BlockHeader = ptr::null_mut();
        let mut current = self.managed_head;
        while !current.is_null() {
            let next = unsafe { (*current).next };
            if unsafe { (*current).is_freed() } {
                if prev.is_null() {
                    self.managed_head = next;
                } else {
                    unsafe { (*prev).next = next };
                }
                self.reclaim_block(current, &mut groups_released);
                reclaimed += 1;
            } else {
                prev = current;
                surviving += 1;
            }
            current = next;
        }

        crate::trace::internal::log_collection_end(reclaimed, surviving, groups_released);
        metrics::record_collection(reclaimed, surviving, groups_released, started.elapsed());
    }

    fn reclaim_block(&mut self, block: *mut BlockHeader, groups_released: &mut usize) {
        let group = unsafe { (*block).owner_group };
        debug_assert!(!group.is_null());
        debug_assert!(unsafe { (*group).contains(block.cast::<u8>()) });

        match unsafe { (*group).role } {
            GroupRole::Small { block_size } => {
                let index = size_class::class_for_block_size(block_size);
                let list = &mut self.free_lists[index];
                unsafe { (*block).next = list.head };
                list.head = block;
                list.count += 1;

                unsafe { (*group).in_use -= 1 };

                // Only hand a fully idle group back when the class list
                // still holds more than one group's worth of blocks, so
                // the next allocation does not refill straight away.
                if unsafe { (*group).in_use } == 0
                    && self.free_lists[index].count > unsafe { (*group).total_blocks }
                {
                    self.scavenge_group(index, group);
                    *groups_released += 1;
                }
            }
            GroupRole::Large => {
                central::release_pages(group);
                *groups_released += 1;
            }
        }
    }

    /// Unlinks every free block belonging to `group` from the class list
    /// and returns the whole span to the central heap.
    fn scavenge_group(&mut self, index: usize, group: *mut PageGroup) {
        debug_assert_eq!(unsafe { (*group).in_use }, 0);

        let list = &mut self.free_lists[index];
        let mut removed = 0usize;
        let mut indirect: *mut *mut BlockHeader = &mut list.head;
        unsafe {
            while !(*indirect).is_null() {
                if (**indirect).owner_group == group {
                    *indirect = (**indirect).next;
                    removed += 1;
                } else {
                    indirect = &mut (**indirect).next;
                }
            }
        }
        list.count -= removed;
        debug_assert_eq!(removed, unsafe { (*group).total_blocks });

        central::release_pages(group);
    }

    /// Releases every fully idle group of one class, warm group included.
    fn release_idle_groups(&mut self, index: usize) {
        loop {
            let mut idle: *mut PageGroup = ptr::null_mut();
            let mut cursor = self.free_lists[index].head;
            unsafe {
                while !cursor.is_null() {
                    let group = (*cursor).owner_group;
                    if (*group).in_use == 0 {
                        idle = group;
                        break;
                    }
                    cursor = (*cursor).next;
                }
            }
            if idle.is_null() {
                break;
            }
            self.scavenge_group(index, idle);
        }
    }
}

impl Drop for ThreadHeap {
    fn drop(&mut self) {
        // Final sweep, then return every fully idle group. Groups with
        // blocks still handed out (or freed remotely after this point)
        // stay mapped forever: a heap with no owner has no collector.
        self.garbage_collect();
        for index in 0..NUM_SIZE_CLASSES {
            self.release_idle_groups(index);
        }
    }
}
