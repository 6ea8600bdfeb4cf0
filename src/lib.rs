//! A buddy-tree allocator over a caller-supplied arena, with an OS `mmap`
//! overflow path for requests too large to serve from the arena.
//!
//! Three pieces, leaves first: [`bitmap`] is a packed bit-vector over
//! caller-owned storage, [`buddy`] is the fixed-arena buddy allocator built
//! on top of it, and [`pseudo`] is the front door that routes a request to
//! the buddy allocator or straight to the OS by size.

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod bitmap;
pub mod buddy;
pub mod error;
pub mod os;
pub mod pseudo;

pub use bitmap::Bitmap;
pub use buddy::BuddyAllocator;
pub use error::{BitmapError, BuddyError, PseudoError};
pub use os::PageSource;
#[cfg(target_os = "linux")]
pub use os::OsPages;
pub use pseudo::PseudoAllocator;
