//! Byte-size constants and formatting.

/// `n` KiB in bytes.
#[inline]
pub const fn kb(n: usize) -> usize {
    n << 10
}

/// `n` MiB in bytes.
#[inline]
pub const fn mb(n: usize) -> usize {
    n << 20
}

/// Human-readable byte count for stats output, e.g. `"1.50 MB"`.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [(&str, usize); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

    UNITS
        .iter()
        .find(|&&(_, scale)| bytes >= scale)
        .map(|&(unit, scale)| format!("{:.2} {}", bytes as f64 / scale as f64, unit))
        .unwrap_or_else(|| format!("{} B", bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_conversions() {
        assert_eq!(kb(16), 16 * 1024);
        assert_eq!(mb(2), 2 * 1024 * 1024);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(16 * 1024), "16.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.50 MB");
        assert_eq!(format_bytes(1 << 31), "2.00 GB");
    }
}
