//! The shared page-level back-end.
//!
//! The central heap owns every OS-mapped region and arbitrates spans —
//! runs of consecutive pages — under a single mutex. Free spans are
//! described *in place* by a [`FreeSpan`] record written at their first
//! byte and threaded onto two intrusive lists at once: a size-indexed
//! list (with a bitmap summary for fast best-fit lookup) and one
//! address-ordered list used for coalescing. Two free spans in the same
//! region are never address-adjacent; they would have been merged.
//!
//! # Lock discipline
//!
//! The heap mutex is never held across a call into the metadata pool or
//! the mapper: descriptors are allocated before the lock is taken, fresh
//! regions are mapped between lock acquisitions, and [`reclaim`]
//! reports a fully idle region back to its caller for unmapping after
//! the lock is released. At most one heap-level mutex is ever held.
//!
//! [`reclaim`]: CentralHeap::reclaim

use std::ptr::NonNull;
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::bitmap::Bitmap;
use crate::page_group::{GroupRole, PageGroup};
use crate::{mapper, metadata};
use crate::{PAGES_PER_REGION, PAGE_SIZE, REGION_BYTES};

/// In-place record describing a free span.
///
/// Written at the span's first byte while the span is free; overwritten
/// the moment the span is handed out. Carries the intrusive links for
/// both lists plus the span length.
#[repr(C)]
#[derive(Clone, Copy)]
struct FreeSpan {
    next_by_size: *mut FreeSpan,
    prev_by_size: *mut FreeSpan,
    next_by_addr: *mut FreeSpan,
    prev_by_addr: *mut FreeSpan,
    page_count: usize,
}

const _: () = assert!(std::mem::size_of::<FreeSpan>() <= PAGE_SIZE);

impl FreeSpan {
    const fn unlinked() -> Self {
        Self {
            next_by_size: std::ptr::null_mut(),
            prev_by_size: std::ptr::null_mut(),
            next_by_addr: std::ptr::null_mut(),
            prev_by_addr: std::ptr::null_mut(),
            page_count: 0,
        }
    }
}

/// Region an address belongs to, by masking off the offset bits.
fn region_of(addr: usize) -> usize {
    addr & !(REGION_BYTES - 1)
}

/// The process-wide span arbiter. One instance lives behind
/// [`acquire_pages`] / [`release_pages`]; the type is public so tests
/// can name it.
pub struct CentralHeap {
    bitmap: Bitmap,
    free_by_size: [FreeSpan; PAGES_PER_REGION + 1],
    free_by_addr: FreeSpan,
}

// The sentinel nodes are self-referential, so the heap is boxed once and
// never moves; the mutex serializes every touch of the raw links.
unsafe impl Send for CentralHeap {}

static CENTRAL_HEAP: OnceLock<Mutex<Box<CentralHeap>>> = OnceLock::new();

fn central() -> &'static Mutex<Box<CentralHeap>> {
    CENTRAL_HEAP.get_or_init(|| Mutex::new(CentralHeap::new_boxed()))
}

/// Acquires a span of `num_pages` consecutive pages.
///
/// Returns a fresh descriptor with `start` and `page_count` filled in and
/// the carving fields untagged (`role` is `Large`, `total_blocks` and
/// `in_use` are zero); the caller re-tags them. `None` on out-of-range
/// requests (`0` or more than [`PAGES_PER_REGION`]) and on OOM.
pub fn acquire_pages(num_pages: usize) -> Option<NonNull<PageGroup>> {
    if num_pages == 0 || num_pages > PAGES_PER_REGION {
        return None;
    }

    // Descriptor first, so the heap mutex is never held across the pool.
    let group = metadata::allocate()?;

    let span = {
        let mut heap = lock_central();
        heap.try_fetch(num_pages)
    };

    let span = match span {
        Some(span) => span,
        None => {
            // Free lists exhausted: map a fresh region between lock
            // acquisitions, keep our prefix and pool only the remainder.
            let Some(region) = mapper::allocate_aligned(REGION_BYTES) else {
                metadata::deallocate(group);
                return None;
            };
            crate::trace::internal::log_region_mapped(region.as_ptr() as usize, REGION_BYTES);

            if num_pages < PAGES_PER_REGION {
                let remainder = unsafe { region.as_ptr().add(num_pages * PAGE_SIZE) };
                let mut heap = lock_central();
                let spilled = heap.reclaim(remainder, PAGES_PER_REGION - num_pages);
                debug_assert!(spilled.is_none(), "partial region cannot be whole");
            }
            region
        }
    };

    unsafe {
        group.as_ptr().write(PageGroup {
            start: span.as_ptr(),
            page_count: num_pages,
            role: GroupRole::Large,
            total_blocks: 0,
            in_use: 0,
        });
    }
    Some(group)
}

/// Returns a span previously handed out by [`acquire_pages`].
///
/// The span goes back to the free pool — coalescing with its neighbours
/// and possibly sending a fully idle region back to the OS — and the
/// descriptor is destroyed. A null `group` is a no-op.
pub fn release_pages(group: *mut PageGroup) {
    let Some(group) = NonNull::new(group) else {
        return;
    };

    let (start, num_pages) = unsafe {
        let g = group.as_ptr();
        ((*g).start, (*g).page_count)
    };
    metadata::deallocate(group);

    let to_unmap = {
        let mut heap = lock_central();
        heap.reclaim(start, num_pages)
    };

    if let Some(region) = to_unmap {
        crate::trace::internal::log_region_unmapped(region.as_ptr() as usize, REGION_BYTES);
        mapper::deallocate_aligned(region.as_ptr(), REGION_BYTES);
    }
}

fn lock_central() -> std::sync::MutexGuard<'static, Box<CentralHeap>> {
    central().lock().unwrap_or_else(PoisonError::into_inner)
}

impl CentralHeap {
    fn new_boxed() -> Box<Self> {
        let mut heap = Box::new(Self {
            bitmap: Bitmap::new(PAGES_PER_REGION + 1),
            free_by_size: [FreeSpan::unlinked(); PAGES_PER_REGION + 1],
            free_by_addr: FreeSpan::unlinked(),
        });

        for index in 0..=PAGES_PER_REGION {
            let head = heap.size_sentinel(index);
            unsafe {
                (*head).next_by_size = head;
                (*head).prev_by_size = head;
            }
        }
        let head = heap.addr_sentinel();
        unsafe {
            (*head).next_by_addr = head;
            (*head).prev_by_addr = head;
        }
        heap
    }

    fn size_sentinel(&mut self, index: usize) -> *mut FreeSpan {
        &mut self.free_by_size[index]
    }

    fn addr_sentinel(&mut self) -> *mut FreeSpan {
        &mut self.free_by_addr
    }

    /// Finds and unlinks a span of exactly `num_pages` pages, splitting a
    /// larger span if that is the best fit. `None` when the pool has
    /// nothing large enough; the caller maps a fresh region.
    fn try_fetch(&mut self, num_pages: usize) -> Option<NonNull<u8>> {
        debug_assert!(num_pages >= 1 && num_pages <= PAGES_PER_REGION);

        let index = self.bitmap.find_first_set(num_pages)?;
        debug_assert!(index <= PAGES_PER_REGION);

        let head = self.size_sentinel(index);
        let span = unsafe { (*head).next_by_size };
        debug_assert!(span != head, "bitmap bit set for an empty size list");

        unsafe {
            self.unlink_from_size_list(span, index);
            self.unlink_from_addr_list(span);
        }

        if index > num_pages {
            // Reclaim re-inserts the remainder (and may merge it with a
            // neighbour); it cannot touch the prefix we are handing out
            // because that prefix is already off both lists.
            let remainder = unsafe { span.cast::<u8>().add(num_pages * PAGE_SIZE) };
            let spilled = self.reclaim(remainder, index - num_pages);
            debug_assert!(spilled.is_none(), "split remainder cannot be whole");
            unsafe { (*span).page_count = num_pages };
        }

        self.debug_check_invariants();
        NonNull::new(span.cast::<u8>())
    }

    /// Inserts `num_pages` free pages at `start` into both lists,
    /// coalescing with address neighbours in the same region.
    ///
    /// When the merged span turns out to be a whole, aligned region *and*
    /// another whole region is already cached in the size-256 list, the
    /// span is detached and returned so the caller can unmap it once the
    /// lock is gone. Keeping one warm region prevents map/unmap churn on
    /// a workload that repeatedly frees and re-demands region-sized
    /// memory.
    #[must_use]
    fn reclaim(&mut self, start: *mut u8, num_pages: usize) -> Option<NonNull<u8>> {
        debug_assert!(!start.is_null() && num_pages > 0);

        let addr_head = self.addr_sentinel();

        // Find the first span at or above `start`; the new span splices
        // in just before it.
        let mut succ = unsafe { (*addr_head).next_by_addr };
        while succ != addr_head && (succ as usize) < start as usize {
            succ = unsafe { (*succ).next_by_addr };
        }
        let pred = unsafe { (*succ).prev_by_addr };

        let span: *mut FreeSpan;
        if pred != addr_head
            && unsafe { pred.cast::<u8>().add((*pred).page_count * PAGE_SIZE) } == start
            && region_of(pred as usize) == region_of(start as usize)
        {
            // Forward merge: the predecessor absorbs the new pages and
            // keeps its place on the address list.
            let pred_pages = unsafe { (*pred).page_count };
            unsafe {
                self.unlink_from_size_list(pred, pred_pages);
                (*pred).page_count = pred_pages + num_pages;
            }
            span = pred;
        } else {
            span = start.cast::<FreeSpan>();
            unsafe {
                (*span).page_count = num_pages;
                (*span).next_by_addr = succ;
                (*span).prev_by_addr = pred;
                (*pred).next_by_addr = span;
                (*succ).prev_by_addr = span;
            }
        }

        // Backward merge with the address successor.
        let next = unsafe { (*span).next_by_addr };
        if next != addr_head
            && unsafe { span.cast::<u8>().add((*span).page_count * PAGE_SIZE) } == next.cast::<u8>()
            && region_of(span as usize) == region_of(next as usize)
        {
            let next_pages = unsafe { (*next).page_count };
            unsafe {
                self.unlink_from_size_list(next, next_pages);
                self.unlink_from_addr_list(next);
                (*span).page_count += next_pages;
            }
        }

        let final_pages = unsafe { (*span).page_count };

        if final_pages == PAGES_PER_REGION
            && (span as usize) % REGION_BYTES == 0
            && self.bitmap.is_set(PAGES_PER_REGION)
        {
            unsafe { self.unlink_from_addr_list(span) };
            self.debug_check_invariants();
            return NonNull::new(span.cast::<u8>());
        }

        debug_assert!(final_pages >= 1 && final_pages <= PAGES_PER_REGION);
        unsafe { self.push_size_list(span, final_pages) };
        self.debug_check_invariants();
        None
    }

    /// # Safety
    ///
    /// `span` must currently be linked into the size list for
    /// `size_index`.
    unsafe fn unlink_from_size_list(&mut self, span: *mut FreeSpan, size_index: usize) {
        unsafe {
            (*(*span).prev_by_size).next_by_size = (*span).next_by_size;
            (*(*span).next_by_size).prev_by_size = (*span).prev_by_size;
        }
        let head = self.size_sentinel(size_index);
        if unsafe { (*head).next_by_size } == head {
            self.bitmap.clear(size_index);
        }
    }

    /// # Safety
    ///
    /// `span` must currently be linked into the address list.
    unsafe fn unlink_from_addr_list(&mut self, span: *mut FreeSpan) {
        unsafe {
            (*(*span).prev_by_addr).next_by_addr = (*span).next_by_addr;
            (*(*span).next_by_addr).prev_by_addr = (*span).prev_by_addr;
        }
    }

    /// # Safety
    ///
    /// `span` must be unlinked from any size list and hold `page_count`
    /// consistent with `size_index`.
    unsafe fn push_size_list(&mut self, span: *mut FreeSpan, size_index: usize) {
        let head = self.size_sentinel(size_index);
        unsafe {
            (*span).next_by_size = (*head).next_by_size;
            (*span).prev_by_size = head;
            (*(*head).next_by_size).prev_by_size = span;
            (*head).next_by_size = span;
        }
        self.bitmap.set(size_index);
    }

    /// Walks the address list checking the structural invariants: strict
    /// address order, no same-region adjacency, and bitmap agreement for
    /// each span's size list.
    #[cfg(debug_assertions)]
    fn debug_check_invariants(&mut self) {
        let addr_head = self.addr_sentinel();
        let mut prev: *mut FreeSpan = std::ptr::null_mut();
        let mut cursor = unsafe { (*addr_head).next_by_addr };
        while cursor != addr_head {
            if !prev.is_null() {
                debug_assert!((prev as usize) < cursor as usize, "address list out of order");
                let prev_end = prev as usize + unsafe { (*prev).page_count } * PAGE_SIZE;
                debug_assert!(
                    prev_end != cursor as usize
                        || region_of(prev as usize) != region_of(cursor as usize),
                    "adjacent free spans left uncoalesced"
                );
            }
            let pages = unsafe { (*cursor).page_count };
            debug_assert!(pages >= 1 && pages <= PAGES_PER_REGION);
            debug_assert!(self.bitmap.is_set(pages), "span in size list without its bit");
            debug_assert!(
                region_of(cursor as usize)
                    == region_of(cursor as usize + pages * PAGE_SIZE - 1),
                "span crosses a region boundary"
            );
            prev = cursor;
            cursor = unsafe { (*cursor).next_by_addr };
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_check_invariants(&mut self) {}
}
