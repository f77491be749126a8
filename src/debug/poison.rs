//! Memory poisoning.
//!
//! Fills slot memory with known patterns so stale reads stand out.

/// Pattern written over the usable bytes of a freed slot.
pub const FREED_PATTERN: u8 = 0xCD;

/// Pattern written over a fresh slot that was not asked to be zeroed.
pub const UNINIT_PATTERN: u8 = 0xAB;

/// Poison a region with the freed pattern.
///
/// # Safety
///
/// The region must be valid and writable.
pub unsafe fn poison_freed(ptr: *mut u8, size: usize) {
    std::ptr::write_bytes(ptr, FREED_PATTERN, size);
}

/// Poison a region with the uninitialized pattern.
///
/// # Safety
///
/// The region must be valid and writable.
pub unsafe fn poison_uninit(ptr: *mut u8, size: usize) {
    std::ptr::write_bytes(ptr, UNINIT_PATTERN, size);
}
