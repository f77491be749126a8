//! Guard cookies written at both ends of every slot.
//!
//! A slot looks like `[cookie][usable bytes][cookie]`. The leading cookie
//! also covers the word the free list reuses, so it is rewritten on every
//! allocation and checked on every free.

/// Bytes per cookie.
pub(crate) const COOKIE_SIZE: usize = 16;

const COOKIE_VALUE: [u8; COOKIE_SIZE] = [
    0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xD0, 0x0D, 0x13, 0x37, 0xF0, 0x05, 0xBA, 0x11, 0xAB, 0x1E,
];

/// Write a cookie at `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for [`COOKIE_SIZE`] writable bytes.
pub(crate) unsafe fn write_cookie(ptr: *mut u8) {
    std::ptr::copy_nonoverlapping(COOKIE_VALUE.as_ptr(), ptr, COOKIE_SIZE);
}

/// Whether the cookie at `ptr` is intact.
///
/// # Safety
///
/// `ptr` must be valid for [`COOKIE_SIZE`] readable bytes.
pub(crate) unsafe fn cookie_intact(ptr: *const u8) -> bool {
    std::slice::from_raw_parts(ptr, COOKIE_SIZE) == COOKIE_VALUE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_detects_overwrite() {
        let mut buf = [0u8; COOKIE_SIZE];
        unsafe {
            write_cookie(buf.as_mut_ptr());
            assert!(cookie_intact(buf.as_ptr()));
        }
        buf[COOKIE_SIZE - 1] ^= 1;
        assert!(unsafe { !cookie_intact(buf.as_ptr()) });
    }
}
