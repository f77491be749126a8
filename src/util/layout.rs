//! Alignment and address arithmetic.

/// Align a size up to the given alignment.
///
/// `align` must be a power of two. Returns `None` if the result overflows.
#[inline]
pub const fn checked_align_up(size: usize, align: usize) -> Option<usize> {
    match size.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align a size up to the given alignment.
///
/// Callers must know the addition cannot overflow.
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Align a size down to the given alignment.
#[inline]
pub const fn align_down(size: usize, align: usize) -> usize {
    size & !(align - 1)
}

/// Whether `value` is a multiple of `align`.
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Number of bits needed to represent `size` (0 for 0).
///
/// Equivalent to the 1-based position of the most significant set bit.
#[inline]
pub const fn bit_length(size: usize) -> u32 {
    usize::BITS - size.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(usize::MAX, 4096), None);
        assert_eq!(checked_align_up(4097, 4096), Some(8192));
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(4095, 4096), 0);
        assert_eq!(align_down(8193, 4096), 8192);
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(8193, 4096));
    }

    #[test]
    fn test_bit_length() {
        assert_eq!(bit_length(0), 0);
        assert_eq!(bit_length(1), 1);
        assert_eq!(bit_length(41), 6);
        assert_eq!(bit_length(usize::MAX), usize::BITS);
    }
}
