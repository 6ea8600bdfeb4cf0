//! The large-allocation back-end: a thin adapter onto the host OS's
//! anonymous private page mapping.
//!
//! This is deliberately the thinnest module in the crate: it owns no
//! allocator invariants, it only maps, unmaps, and reports the errno on
//! failure. [`PageSource`] exists so the rest of the crate (and its tests)
//! can swap the real OS adapter for a fake one backed by a plain buffer,
//! so the routing and prefix logic in [`crate::pseudo`] can be exercised
//! without a real kernel underneath it.

/// Something that can hand out and take back whole pages of anonymous
/// memory.
pub trait PageSource {
    /// Map at least `len` bytes of zeroed, readable/writable memory.
    /// Returns the OS errno on failure.
    fn map(&mut self, len: usize) -> Result<*mut u8, i32>;

    /// Unmap a region previously returned by `map` with the exact same
    /// `len` that was passed to `map`.
    ///
    /// # Safety
    /// `ptr` must be a pointer returned by a prior, not-yet-unmapped call
    /// to `map` on this same source, and `len` must match that call's `len`.
    unsafe fn unmap(&mut self, ptr: *mut u8, len: usize) -> Result<(), i32>;
}

/// The real OS-backed [`PageSource`], implemented with `mmap`/`munmap`.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPages;

#[cfg(target_os = "linux")]
impl PageSource for OsPages {
    fn map(&mut self, len: usize) -> Result<*mut u8, i32> {
        // SAFETY: a private anonymous mapping with no backing file never
        // aliases other memory; `len` is checked non-zero by callers
        // before this is reached.
        let p = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == libc::MAP_FAILED {
            Err(unsafe { *libc::__errno_location() })
        } else {
            Ok(p as *mut u8)
        }
    }

    unsafe fn unmap(&mut self, ptr: *mut u8, len: usize) -> Result<(), i32> {
        // SAFETY: forwarded from this function's own safety contract.
        let ret = unsafe { libc::munmap(ptr as *mut core::ffi::c_void, len) };
        if ret != 0 {
            Err(unsafe { *libc::__errno_location() })
        } else {
            Ok(())
        }
    }
}
