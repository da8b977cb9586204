/// Placeholder returned when a packed ASCII identifier cannot be decoded.
pub const UNKNOWN_SERIAL: &str = "unknown_serial";

// half away from zero
fn round_to(value: f64, precision: u8) -> f64 {
    let scale = 10_f64.powi(i32::from(precision));
    (value * scale).round() / scale
}

/// `round(value * factor, precision)`
pub fn decode_scaled(value: u16, factor: f64, precision: u8) -> f64 {
    round_to(f64::from(value) * factor, precision)
}

/// Combines two registers as `(high << 16) | low` and scales like
/// [`decode_scaled`]. Callers pass the high word first.
pub fn decode_wide(high: u16, low: u16, factor: f64, precision: u8) -> f64 {
    let combined = (u32::from(high) << 16) | u32::from(low);
    round_to(f64::from(combined) * factor, precision)
}

/// 16 character binary representation, most significant bit first.
pub fn decode_bitfield_binary(value: u16) -> String {
    format!("{value:016b}")
}

/// Each register contributes its high byte then its low byte.
///
/// Returns [`UNKNOWN_SERIAL`] when any register is missing or the result is
/// not printable ASCII. NUL padding is stripped from the end.
pub fn decode_ascii_pair(values: &[Option<u16>]) -> String {
    let mut decoded = String::with_capacity(values.len() * 2);
    for value in values {
        let Some(value) = value else {
            return UNKNOWN_SERIAL.to_string();
        };
        for byte in value.to_be_bytes() {
            if !(byte.is_ascii_graphic() || byte == b' ' || byte == 0) {
                return UNKNOWN_SERIAL.to_string();
            }
            decoded.push(char::from(byte));
        }
    }
    decoded.trim_end_matches('\0').to_string()
}

/// Bit 0 is the least significant bit. Indices past 15 read as `false`.
pub fn decode_bit(value: u16, bit_index: u8) -> bool {
    value.checked_shr(u32::from(bit_index)).unwrap_or(0) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_rounds_half_away_from_zero() {
        assert_eq!(decode_scaled(5, 0.1, 0), 1.0);
        assert_eq!(decode_scaled(15, 0.1, 0), 2.0);
        assert_eq!(decode_scaled(25, 0.1, 0), 3.0);
    }

    #[test]
    fn scaled_keeps_requested_precision() {
        assert_eq!(decode_scaled(150, 0.1, 1), 15.0);
        assert_eq!(decode_scaled(255, 0.01, 3), 2.55);
        assert_eq!(decode_scaled(2301, 0.1, 2), 230.1);
        assert_eq!(decode_scaled(0, 0.1, 1), 0.0);
    }

    #[test]
    fn wide_combines_high_then_low() {
        assert_eq!(decode_wide(0, 1020, 0.1, 1), 102.0);
        assert_eq!(decode_wide(1, 0, 1.0, 0), 65536.0);
        assert_eq!(decode_wide(0xffff, 0xffff, 1.0, 0), 4_294_967_295.0);
        assert_eq!(decode_wide(0x0001, 0x86a0, 0.1, 1), 10000.0);
    }

    #[test]
    fn wide_matches_scaled_formula() {
        for (high, low) in [(0u16, 0u16), (3, 7), (0x1234, 0xabcd), (0xffff, 1)] {
            let expected = round_to(f64::from((u32::from(high) << 16) | u32::from(low)) * 0.1, 1);
            assert_eq!(decode_wide(high, low, 0.1, 1), expected);
        }
    }

    #[test]
    fn bitfield_is_fixed_width() {
        assert_eq!(decode_bitfield_binary(0), "0000000000000000");
        assert_eq!(decode_bitfield_binary(1), "0000000000000001");
        assert_eq!(decode_bitfield_binary(65535), "1111111111111111");
        assert_eq!(decode_bitfield_binary(0b1010_0000_0000_0011), "1010000000000011");
    }

    #[test]
    fn ascii_pairs_read_high_byte_first() {
        assert_eq!(decode_ascii_pair(&[Some(0x4142), Some(0x4344)]), "ABCD");
        assert_eq!(decode_ascii_pair(&[Some(0x4142), Some(0x4300)]), "ABC");
        assert_eq!(decode_ascii_pair(&[]), "");
    }

    #[test]
    fn ascii_pairs_fall_back_to_placeholder() {
        assert_eq!(decode_ascii_pair(&[Some(0x4142), None]), UNKNOWN_SERIAL);
        assert_eq!(decode_ascii_pair(&[Some(0x41ff)]), UNKNOWN_SERIAL);
    }

    #[test]
    fn bits_are_indexed_from_lsb() {
        assert!(decode_bit(0b1000, 3));
        assert!(!decode_bit(0b1000, 2));
        assert!(decode_bit(0x8000, 15));
        assert!(!decode_bit(0xffff, 16));
    }
}
