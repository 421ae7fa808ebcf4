//! Loads and stores the compiler isn't allowed to elide.

use core::ptr;

/// Perform a single load from `p` and discard the result.
///
/// # Safety
///
/// `p` must be valid for reads.
#[inline(always)]
pub unsafe fn touch<T>(p: *const T) {
    unsafe { ptr::read_volatile(p); }
}

/// Read-modify-write the word at `p` (increment it by one).
///
/// # Safety
///
/// `p` must be valid for reads and writes, and properly aligned.
#[inline(always)]
pub unsafe fn bump(p: *mut u64) {
    unsafe {
        let v = ptr::read_volatile(p);
        ptr::write_volatile(p, v.wrapping_add(1));
    }
}

/// Round `addr` down to the containing 8-byte word.
///
/// The word always lies in the same cache line as `addr`.
#[inline(always)]
pub const fn word_of(addr: usize) -> usize {
    addr & !(core::mem::size_of::<u64>() - 1)
}
