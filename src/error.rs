//! Error enums for each module boundary.
//!
//! One enum per collaborator rather than a single crate-wide error type:
//! a plain `Debug + Clone + PartialEq` enum for each, with a `From` impl
//! where one error wraps another.

/// Bitmap precondition violation: `index` was out of range for `num_bits`.
///
/// Per the allocator's contract this is fatal to the operation (abort
/// acceptable) rather than a recoverable condition, so it is only ever
/// constructed to describe a panic, never returned from a `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapError {
    pub index: usize,
    pub num_bits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuddyError {
    /// `arena` or `bitmap_buf` was empty.
    InvalidArgument,
    /// `size` passed to `malloc` was zero.
    InvalidSize,
    /// `min_bucket_size != arena.len() >> num_levels`, or `num_levels` was
    /// zero or exceeded `MAX_LEVELS`, or the arena length was not a power
    /// of two.
    ConfigInconsistent,
    /// The supplied bitmap buffer is smaller than `Bitmap::bytes_for` the
    /// node count requires.
    BitmapTooSmall { needed: usize, available: usize },
    /// No free block was available at the required level.
    OutOfMemory,
    /// The node addressed by the pointer passed to `free` was already free.
    DoubleFree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoError {
    /// `size` passed to `alloc` was zero.
    InvalidSize,
    /// `free` was called with a null pointer.
    NullPointer,
    /// `size` plus the mmap-path prefix overflowed `usize`.
    OutOfMemory,
    /// The OS declined to map the requested pages.
    MappingFailed(i32),
    /// The OS declined to unmap a previously mapped region.
    UnmappingFailed(i32),
    /// The buddy allocator rejected the request; see the wrapped error.
    Buddy(BuddyError),
}

impl From<BuddyError> for PseudoError {
    fn from(value: BuddyError) -> Self {
        PseudoError::Buddy(value)
    }
}
