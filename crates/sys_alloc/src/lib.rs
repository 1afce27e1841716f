//! Anonymous memory mapping primitives.
//!
//! This crate is the OS boundary of the allocator: it knows how to create
//! private anonymous mappings and how to release them, partially or in
//! full. Everything above it works in terms of raw page runs.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

pub use os::page_size;

/// A handle to a memory mapped region.
///
/// The region is automatically unmapped when this handle is dropped,
/// unless ownership is taken over with [`Mmap::into_raw`].
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the memory mapping.
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the memory mapping in bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping has zero length.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Consumes the handle and returns the raw mapping without unmapping it.
    ///
    /// The caller becomes responsible for releasing the memory with
    /// [`unmap`], in one piece or in page-aligned fragments.
    pub fn into_raw(self) -> (*mut u8, usize) {
        self.inner.into_raw()
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Releases part or all of a mapping obtained through this crate.
///
/// # Safety
///
/// `ptr` must be page-aligned and `[ptr, ptr + len)` must lie within a
/// currently mapped range that no live reference points into. `len` must
/// be a multiple of the system page size.
pub unsafe fn unmap(ptr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { os::unmap(ptr, len) }
}

/// Configuration for creating a memory mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
    no_reserve: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with default settings (length 0).
    /// You must set a length before mapping.
    pub fn new() -> Self {
        Self {
            len: 0,
            populate: false,
            no_reserve: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    pub fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to pre-populate (prefault) the page tables.
    ///
    /// On Linux, this adds `MAP_POPULATE`.
    pub fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Sets whether to reserve swap space (on supported platforms).
    ///
    /// On Linux, this adds `MAP_NORESERVE`.
    pub fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Creates an anonymous private memory map.
    ///
    /// # Safety
    ///
    /// The mapping itself is owned by the returned `Mmap`, but this crate
    /// is a low-level building block: callers routinely turn the handle
    /// into raw pointers ([`Mmap::into_raw`]) and carve it up, at which
    /// point all the usual raw-pointer obligations apply.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        let inner = unsafe { os::MmapInner::map_anon(self.len, self.populate, self.no_reserve)? };
        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
