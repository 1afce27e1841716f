//! Size-class table and request routing.
//!
//! Each class names the total block size (header included) and how many
//! pages a refill acquires. Page counts are picked so a refill carves into
//! a whole number of blocks with little internal waste.

use crate::block::BLOCK_HEADER_SIZE;

/// Number of small-object size classes.
pub(crate) const NUM_SIZE_CLASSES: usize = 17;

struct SizeClass {
    block_size: usize,
    pages_to_acquire: usize,
}

#[rustfmt::skip]
const SIZE_CLASSES: [SizeClass; NUM_SIZE_CLASSES] = [
    SizeClass { block_size:    32, pages_to_acquire:  1 },
    SizeClass { block_size:    48, pages_to_acquire:  1 },
    SizeClass { block_size:    64, pages_to_acquire:  1 },
    SizeClass { block_size:    80, pages_to_acquire:  1 },
    SizeClass { block_size:    96, pages_to_acquire:  1 },
    SizeClass { block_size:   112, pages_to_acquire:  1 },
    SizeClass { block_size:   128, pages_to_acquire:  1 },
    SizeClass { block_size:   192, pages_to_acquire:  2 },
    SizeClass { block_size:   256, pages_to_acquire:  2 },
    SizeClass { block_size:   384, pages_to_acquire:  3 },
    SizeClass { block_size:   512, pages_to_acquire:  4 },
    SizeClass { block_size:   768, pages_to_acquire:  6 },
    SizeClass { block_size:  1024, pages_to_acquire:  8 },
    SizeClass { block_size:  2048, pages_to_acquire: 16 },
    SizeClass { block_size:  4096, pages_to_acquire: 32 },
    SizeClass { block_size:  8192, pages_to_acquire: 32 },
    SizeClass { block_size: 16384, pages_to_acquire: 32 },
];

/// Largest user request the small path can serve.
#[allow(dead_code)]
pub(crate) const MAX_SMALL_REQUEST: usize =
    SIZE_CLASSES[NUM_SIZE_CLASSES - 1].block_size - BLOCK_HEADER_SIZE;

/// Routes a user request to a size class, or `None` for the large path.
///
/// Routing is header-inclusive: the class must fit `size` usable bytes
/// *plus* the block header, so the "at least `size` bytes" contract holds
/// for every class.
pub(crate) fn class_for_request(size: usize) -> Option<usize> {
    let needed = size.checked_add(BLOCK_HEADER_SIZE)?;
    SIZE_CLASSES.iter().position(|c| c.block_size >= needed)
}

/// Maps a small group's block size back to its class index.
pub(crate) fn class_for_block_size(block_size: usize) -> usize {
    let index = SIZE_CLASSES
        .iter()
        .position(|c| c.block_size >= block_size)
        .expect("block size beyond the class table");
    debug_assert_eq!(SIZE_CLASSES[index].block_size, block_size);
    index
}

/// Total block size (header included) for class `index`.
pub(crate) fn block_size(index: usize) -> usize {
    SIZE_CLASSES[index].block_size
}

/// Pages one refill of class `index` acquires from the central heap.
pub(crate) fn pages_to_acquire(index: usize) -> usize {
    SIZE_CLASSES[index].pages_to_acquire
}
