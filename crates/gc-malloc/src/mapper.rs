//! Power-of-two aligned anonymous mappings.
//!
//! The central heap and the metadata pool both need naturally aligned
//! chunks so that a span's region is recoverable by masking its address.
//! The OS only promises page alignment, so we over-allocate by 2x and
//! trim: map `2 * size` bytes, find the first `size`-aligned address
//! inside, and unmap the slack on both ends.

use std::ptr::NonNull;

use sys_alloc::MmapOptions;

/// Maps `size` anonymous bytes aligned to `size`.
///
/// `size` must be a power of two and a multiple of the OS page size.
/// Returns `None` when the OS refuses the mapping. Stateless and safe to
/// call from any thread.
pub(crate) fn allocate_aligned(size: usize) -> Option<NonNull<u8>> {
    debug_assert!(size > 0 && size.is_power_of_two());
    debug_assert!(size % sys_alloc::page_size() == 0);

    let over_alloc = size.checked_mul(2)?;
    let mmap = unsafe { MmapOptions::new().len(over_alloc).map_anon() }.ok()?;
    let (raw, raw_len) = mmap.into_raw();

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + size - 1) & !(size - 1);

    // Head and tail slack are page multiples: the raw mapping is
    // page-aligned and `size` is a page multiple.
    let head_trim = aligned_addr - raw_addr;
    if head_trim > 0 {
        let _ = unsafe { sys_alloc::unmap(raw, head_trim) };
    }

    let tail_trim = raw_addr + raw_len - (aligned_addr + size);
    if tail_trim > 0 {
        let _ = unsafe { sys_alloc::unmap((aligned_addr + size) as *mut u8, tail_trim) };
    }

    NonNull::new(aligned_addr as *mut u8)
}

/// Unmaps a chunk previously returned by [`allocate_aligned`].
///
/// No-op on a null pointer or zero size.
pub(crate) fn deallocate_aligned(ptr: *mut u8, size: usize) {
    if ptr.is_null() || size == 0 {
        return;
    }
    let _ = unsafe { sys_alloc::unmap(ptr, size) };
}
