//! The front door: routes a request to the buddy allocator or to the OS's
//! page mapping facility by size, and recovers the right back-end on free
//! from the word stored immediately before the user pointer.


use core::mem::size_of;

use crate::buddy::BuddyAllocator;
use crate::error::PseudoError;
use crate::os::PageSource;

const WORD_SIZE: usize = size_of::<usize>();

/// A quarter of a typical 4 KiB page. Requests at or above this size skip
/// the buddy allocator and go straight to the OS.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Routes allocation requests to a [`BuddyAllocator`] or to `S`'s anonymous
/// page mapping, by size.
///
/// `S` is the page source ([`crate::os::OsPages`] in production, a fake
/// buffer-backed source in tests), kept generic so the routing and prefix
/// bookkeeping logic is exercised without a real OS underneath it.
pub struct PseudoAllocator<'a, S: PageSource> {
    buddy: BuddyAllocator<'a>,
    pages: S,
    threshold: usize,
}

impl<'a, S: PageSource> PseudoAllocator<'a, S> {
    /// Build a front door over `buddy` and `pages` using [`DEFAULT_THRESHOLD`].
    pub fn new(buddy: BuddyAllocator<'a>, pages: S) -> Self {
        Self::with_threshold(buddy, pages, DEFAULT_THRESHOLD)
    }

    /// Build a front door with an explicit threshold.
    ///
    /// `threshold` must exceed any `original_size` the buddy path could
    /// ever store for the discrimination in `free` to stay unambiguous;
    /// since the buddy path is only ever entered for `size < threshold`,
    /// this holds for any `threshold` by construction.
    pub fn with_threshold(buddy: BuddyAllocator<'a>, pages: S, threshold: usize) -> Self {
        Self { buddy, pages, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Allocate `size` bytes, returning the address past the prefix.
    pub fn alloc(&mut self, size: usize) -> Result<*mut u8, PseudoError> {
        if size == 0 {
            log::warn!("pseudo alloc: rejected zero-size request");
            return Err(PseudoError::InvalidSize);
        }

        if size >= self.threshold {
            let mapped_len = match size.checked_add(WORD_SIZE) {
                Some(len) => len,
                None => return Err(PseudoError::OutOfMemory),
            };
            log::debug!("pseudo alloc: routing {size} bytes (>= threshold {}) to mmap", self.threshold);

            let base = self.pages.map(mapped_len).map_err(|errno| {
                log::error!("pseudo alloc: mmap failed for {mapped_len} bytes, errno {errno}");
                PseudoError::MappingFailed(errno)
            })?;

            // SAFETY: `map` guarantees `mapped_len` bytes of writable memory
            // starting at `base`, and `mapped_len >= WORD_SIZE`.
            unsafe { (base as *mut usize).write(mapped_len) };
            let user_ptr = unsafe { base.add(WORD_SIZE) };

            log::debug!("pseudo alloc: mmap succeeded, address {user_ptr:p}, mapped length {mapped_len}");
            Ok(user_ptr)
        } else {
            log::debug!("pseudo alloc: routing {size} bytes (< threshold {}) to buddy allocator", self.threshold);
            Ok(self.buddy.malloc(size)?)
        }
    }

    /// Release a block previously returned by `alloc`.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), PseudoError> {
        if ptr.is_null() {
            log::error!("pseudo free: null pointer");
            return Err(PseudoError::NullPointer);
        }

        // SAFETY: the word directly before `ptr` is, for the OS path, the
        // mapped length, and for the buddy path, the original requested
        // size (the second of its two prefix words); both were written
        // by a prior `alloc` call. Since `alloc` only routes to the OS
        // when `size >= threshold`, this word alone distinguishes the two
        // back-ends unambiguously.
        let word_before = unsafe { *(ptr as *const usize).offset(-1) };

        if word_before >= self.threshold {
            log::debug!("pseudo free: routing address {ptr:p} (tag {word_before} >= threshold {}) to munmap", self.threshold);
            let base = unsafe { ptr.offset(-(WORD_SIZE as isize)) };
            // SAFETY: `base` and `word_before` were written by a prior
            // `alloc` call that mapped exactly `word_before` bytes there.
            unsafe { self.pages.unmap(base, word_before) }.map_err(|errno| {
                log::error!("pseudo free: munmap failed for address {ptr:p}, errno {errno}");
                PseudoError::UnmappingFailed(errno)
            })?;
            log::debug!("pseudo free: munmap succeeded, address {ptr:p}");
            Ok(())
        } else {
            log::debug!("pseudo free: routing address {ptr:p} (tag {word_before} < threshold {}) to buddy allocator", self.threshold);
            self.buddy.free(ptr).map_err(PseudoError::from)
        }
    }
}
