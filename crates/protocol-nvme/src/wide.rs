//! 128-bit little-endian counters and byte-count rendering.
//!
//! SMART and identify pages carry 16-byte little-endian counters. A `u128`
//! holds the full range exactly, so decoding is lossless.

/// Size of one SMART "data unit": 1000 blocks of 512 bytes.
pub const DATA_UNIT_BYTES: u128 = 512 * 1000;

const SUFFIXES: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Decode a 16-byte little-endian span.
///
/// Equivalent to reversing the bytes and reading a big-endian magnitude.
pub fn decode_le128(bytes: &[u8; 16]) -> u128 {
    u128::from_le_bytes(*bytes)
}

/// Convert a SMART data-unit counter into bytes.
///
/// Returns `None` if the product no longer fits in 128 bits.
pub fn data_units_to_bytes(units: u128) -> Option<u128> {
    units.checked_mul(DATA_UNIT_BYTES)
}

/// Render a byte count with a decimal (power of 1000) suffix.
///
/// Plain bytes print as an exact integer; larger units print with three
/// significant digits.
pub fn format_human_bytes(value: u128) -> String {
    let mut unit = 0;
    let mut divisor: u128 = 1;

    while unit < SUFFIXES.len() - 1 && value / divisor >= 1000 {
        divisor *= 1000;
        unit += 1;
    }

    if unit == 0 {
        return format!("{} {}", value, SUFFIXES[0]);
    }

    let whole = value / divisor;
    let frac = value % divisor;
    let scaled = whole as f64 + frac as f64 / divisor as f64;

    let mut rounded = round_to(scaled, significant_decimals(scaled));
    if rounded >= 1000.0 && unit < SUFFIXES.len() - 1 {
        rounded /= 1000.0;
        unit += 1;
    }

    format!(
        "{:.*} {}",
        significant_decimals(rounded),
        rounded,
        SUFFIXES[unit]
    )
}

fn significant_decimals(x: f64) -> usize {
    if x >= 100.0 {
        0
    } else if x >= 10.0 {
        1
    } else {
        2
    }
}

fn round_to(x: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (x * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_le128_low_byte() {
        let mut bytes = [0u8; 16];
        bytes[0] = 1;
        assert_eq!(decode_le128(&bytes), 1);
    }

    #[test]
    fn test_decode_le128_high_byte() {
        let mut bytes = [0u8; 16];
        bytes[15] = 1;
        assert_eq!(decode_le128(&bytes), 1u128 << 120);
    }

    #[test]
    fn test_decode_le128_matches_reversed_big_endian() {
        let bytes: [u8; 16] = core::array::from_fn(|i| (i as u8).wrapping_mul(37));
        let mut reversed = bytes;
        reversed.reverse();
        assert_eq!(decode_le128(&bytes), u128::from_be_bytes(reversed));
    }

    #[test]
    fn test_format_base_unit_is_exact() {
        assert_eq!(format_human_bytes(0), "0 B");
        assert_eq!(format_human_bytes(999), "999 B");
    }

    #[test]
    fn test_format_selects_unit_at_threshold() {
        assert_eq!(format_human_bytes(1000), "1.00 KB");
        assert_eq!(format_human_bytes(1_000_000), "1.00 MB");
        assert_eq!(format_human_bytes(1_234_567), "1.23 MB");
        assert_eq!(format_human_bytes(12_345_678_901), "12.3 GB");
        assert_eq!(format_human_bytes(512_000), "512 KB");
    }

    #[test]
    fn test_format_rounding_carries_into_next_unit() {
        assert_eq!(format_human_bytes(999_999), "1.00 MB");
        assert_eq!(format_human_bytes(9_999), "10.0 KB");
    }

    #[test]
    fn test_format_largest_unit() {
        assert_eq!(format_human_bytes(10u128.pow(24)), "1.00 YB");
        assert!(format_human_bytes(u128::MAX).ends_with(" YB"));
    }

    #[test]
    fn test_data_units_to_bytes() {
        assert_eq!(data_units_to_bytes(3), Some(1_536_000));
        assert_eq!(format_human_bytes(data_units_to_bytes(3).unwrap()), "1.54 MB");
        assert_eq!(data_units_to_bytes(u128::MAX), None);
    }
}
