//! A fixed-arena buddy allocator built on a bitmap over a complete binary
//! tree.
//!
//! Every subdivision of the arena is a node in a heap-ordered complete
//! binary tree: level 0 is the whole arena, level `num_levels` is the
//! smallest class (`min_bucket_size`). A bit is `1` when the node, or any
//! descendant of it, is allocated, and `0` when the node and every
//! descendant are free. `malloc` picks the leftmost free node at the
//! level whose class just fits the (padded) request and marks its whole
//! ancestor/descendant chain occupied; this "implicit split" is what keeps
//! the search itself a single linear scan of one level rather than a
//! search over the whole tree.

#[cfg(test)]
mod tests;

use core::mem::size_of;

use crate::bitmap::Bitmap;
use crate::error::BuddyError;

/// Ceiling on `num_levels`: high enough to index any arena worth caring
/// about, low enough that `1 << (num_levels + 1)` never overflows `usize`
/// node-count arithmetic on a 32-bit target.
pub const MAX_LEVELS: usize = 24;

const WORD_SIZE: usize = size_of::<usize>();
const PREFIX_BYTES: usize = 2 * WORD_SIZE;

#[inline]
const fn floor_log2(x: usize) -> u32 {
    usize::BITS - 1 - x.leading_zeros()
}

#[inline]
const fn first_idx_of_level(level: usize) -> usize {
    (1usize << level) - 1
}

#[inline]
const fn level_of(idx: usize) -> usize {
    floor_log2(idx + 1) as usize
}

#[inline]
const fn offset_in_level(idx: usize) -> usize {
    idx - first_idx_of_level(level_of(idx))
}

#[inline]
const fn parent_of(idx: usize) -> usize {
    (idx - 1) / 2
}

/// Index of `idx`'s sibling under the same parent, or `idx` itself at the
/// root (the root is its own fixed point, it has no buddy).
///
/// Given the child formulas `2i+1`/`2i+2`, the first index of any level
/// `L >= 1` is odd, so an odd `idx` is always a left child (its buddy is
/// `idx + 1`) and an even, non-zero `idx` is always a right child (its
/// buddy is `idx - 1`).
#[inline]
const fn buddy_of(idx: usize) -> usize {
    if idx == 0 {
        0
    } else if idx % 2 == 1 {
        idx + 1
    } else {
        idx - 1
    }
}

fn mark_descendants(bitmap: &mut Bitmap, node: usize, value: bool) {
    if node >= bitmap.num_bits() {
        return;
    }
    bitmap.set(node, value);
    mark_descendants(bitmap, 2 * node + 1, value);
    mark_descendants(bitmap, 2 * node + 2, value);
}

fn mark_ancestors(bitmap: &mut Bitmap, node: usize, value: bool) {
    bitmap.set(node, value);
    if node > 0 {
        mark_ancestors(bitmap, parent_of(node), value);
    }
}

/// A buddy allocator over a borrowed arena and a borrowed bitmap buffer.
///
/// Neither buffer is owned: both are borrowed for `'a`, the lifetime of
/// this allocator. There is no teardown operation; when the borrows end
/// the caller is free to do whatever it likes with the underlying memory.
pub struct BuddyAllocator<'a> {
    arena: &'a mut [u8],
    bitmap: Bitmap<'a>,
    num_levels: usize,
    min_bucket_size: usize,
    memory_size: usize,
}

impl<'a> BuddyAllocator<'a> {
    /// Construct a buddy allocator over `arena`, tracking occupancy in
    /// `bitmap_buf`.
    ///
    /// `arena.len()` must be a power of two equal to
    /// `min_bucket_size << num_levels`; `bitmap_buf` must be large enough
    /// for `Bitmap::bytes_for(2^(num_levels+1) - 1)` bytes. On success the
    /// bitmap is zeroed (every node free) and an init summary is logged.
    pub fn init(
        arena: &'a mut [u8],
        bitmap_buf: &'a mut [u8],
        num_levels: usize,
        min_bucket_size: usize,
    ) -> Result<Self, BuddyError> {
        if arena.is_empty() || bitmap_buf.is_empty() {
            log::error!("buddy init: arena or bitmap buffer is empty");
            return Err(BuddyError::InvalidArgument);
        }
        if num_levels == 0 || num_levels >= MAX_LEVELS {
            log::error!("buddy init: num_levels {num_levels} out of range (1..{MAX_LEVELS})");
            return Err(BuddyError::ConfigInconsistent);
        }
        if min_bucket_size == 0 {
            log::error!("buddy init: min_bucket_size must be > 0");
            return Err(BuddyError::ConfigInconsistent);
        }
        if !arena.len().is_power_of_two() {
            log::error!("buddy init: arena size {} is not a power of two", arena.len());
            return Err(BuddyError::ConfigInconsistent);
        }
        if min_bucket_size != arena.len() >> num_levels {
            log::error!(
                "buddy init: min_bucket_size {min_bucket_size} != arena_size {} >> num_levels {num_levels}",
                arena.len()
            );
            return Err(BuddyError::ConfigInconsistent);
        }

        let num_bits = (1usize << (num_levels + 1)) - 1;
        let needed = Bitmap::bytes_for(num_bits);
        if bitmap_buf.len() < needed {
            log::error!("buddy init: bitmap buffer too small, need {needed} bytes, have {}", bitmap_buf.len());
            return Err(BuddyError::BitmapTooSmall { needed, available: bitmap_buf.len() });
        }

        let memory_size = arena.len();
        let mut bitmap = Bitmap::new(bitmap_buf, num_bits)
            .map_err(|_| BuddyError::BitmapTooSmall { needed, available: bitmap_buf.len() })?;
        bitmap.clear_all();

        log::info!(
            "buddy allocator created: levels={num_levels} memory_size={memory_size} bits={num_bits} bitmap_bytes={needed} min_bucket_size={min_bucket_size}"
        );

        Ok(Self { arena, bitmap, num_levels, min_bucket_size, memory_size })
    }

    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn min_bucket_size(&self) -> usize {
        self.min_bucket_size
    }

    fn block_size_at(&self, level: usize) -> usize {
        self.memory_size >> level
    }

    /// Scan level `level` left to right and return the index of the first
    /// free node, or `None` if the whole level is occupied.
    fn find_free_at_level(&self, level: usize) -> Option<usize> {
        let first = first_idx_of_level(level);
        let count = 1usize << level;
        (first..first + count).find(|&idx| !self.bitmap.get(idx))
    }

    /// Allocate a block able to hold `size` bytes plus the buddy-path
    /// prefix, returning the address just past the prefix.
    pub fn malloc(&mut self, size: usize) -> Result<*mut u8, BuddyError> {
        if size == 0 {
            log::warn!("buddy malloc: rejected zero-size request");
            return Err(BuddyError::InvalidSize);
        }

        let padded = match size.checked_add(PREFIX_BYTES) {
            Some(p) => p,
            None => return Err(BuddyError::OutOfMemory),
        };
        if padded > self.memory_size {
            log::warn!("buddy malloc: requested {size} bytes (+{PREFIX_BYTES} overhead) exceeds arena of {}", self.memory_size);
            return Err(BuddyError::OutOfMemory);
        }

        let ratio = self.memory_size / padded;
        let level = (floor_log2(ratio) as usize).min(self.num_levels);

        log::debug!(
            "buddy malloc: requested {size} bytes, padded {padded}, class {} bytes at level {level}",
            self.block_size_at(level)
        );

        let idx = match self.find_free_at_level(level) {
            Some(idx) => idx,
            None => {
                log::warn!("buddy malloc: no free block at level {level}");
                return Err(BuddyError::OutOfMemory);
            }
        };

        mark_descendants(&mut self.bitmap, idx, true);
        mark_ancestors(&mut self.bitmap, idx, true);

        let block_size = self.block_size_at(level);
        let offset_bytes = offset_in_level(idx) * block_size;

        // SAFETY: `offset_bytes + block_size <= memory_size == arena.len()`
        // because `idx` is a valid node of `level` and `block_size` is that
        // level's class size, and `block_size >= padded >= PREFIX_BYTES`, so
        // writing the two prefix words at `offset_bytes` stays in bounds.
        let base = unsafe { self.arena.as_mut_ptr().add(offset_bytes) };
        unsafe {
            (base as *mut usize).write(idx);
            (base as *mut usize).add(1).write(size);
        }
        let user_ptr = unsafe { base.add(PREFIX_BYTES) };

        log::debug!("buddy malloc: succeeded, node {idx}, address {user_ptr:p}");
        Ok(user_ptr)
    }

    /// Release a block previously returned by `malloc`.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), BuddyError> {
        if ptr.is_null() {
            log::error!("buddy free: null pointer");
            return Err(BuddyError::InvalidArgument);
        }

        // SAFETY: every pointer this allocator hands out has the
        // `[bitmap_index, original_size]` prefix written two words before
        // it by `malloc`.
        let idx = unsafe { *(ptr as *const usize).offset(-2) };

        if !self.bitmap.get(idx) {
            log::error!("buddy free: double free at node {idx} (address {ptr:p})");
            return Err(BuddyError::DoubleFree);
        }

        mark_descendants(&mut self.bitmap, idx, false);
        self.merge_upward(idx);

        log::debug!("buddy free: succeeded, node {idx}, address {ptr:p}");
        Ok(())
    }

    /// Walk upward from `node`, clearing parent bits as long as each
    /// node's buddy is also free, stopping at the root or at the first
    /// occupied buddy.
    fn merge_upward(&mut self, node: usize) {
        if node == 0 {
            return;
        }
        let buddy = buddy_of(node);
        if self.bitmap.get(buddy) {
            return;
        }
        let parent = parent_of(node);
        self.bitmap.set(parent, false);
        self.merge_upward(parent);
    }
}
