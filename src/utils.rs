//! Utility functions for the weighscale-rust-ble crate.

use crate::error::{Error, Result};

/// Pounds per kilogram.
const POUNDS_PER_KILOGRAM: f64 = 2.204_622_621_8;

/// Convert kilograms to pounds.
///
/// # Example
///
/// ```
/// use weighscale_rust_ble::kilograms_to_pounds;
///
/// let pounds = kilograms_to_pounds(100.0);
/// assert!((pounds - 220.462).abs() < 0.001);
/// ```
#[inline]
pub fn kilograms_to_pounds(kilograms: f64) -> f64 {
    kilograms * POUNDS_PER_KILOGRAM
}

/// Convert pounds to kilograms.
///
/// # Example
///
/// ```
/// use weighscale_rust_ble::pounds_to_kilograms;
///
/// let kilograms = pounds_to_kilograms(220.462_262_18);
/// assert!((kilograms - 100.0).abs() < 0.001);
/// ```
#[inline]
pub fn pounds_to_kilograms(pounds: f64) -> f64 {
    pounds / POUNDS_PER_KILOGRAM
}

/// Format bytes as lowercase hex with a space between every byte.
///
/// ```
/// use weighscale_rust_ble::utils::hex_spaced;
///
/// assert_eq!(hex_spaced(&[0x10, 0x08, 0x1c]), "10 08 1c");
/// ```
pub fn hex_spaced(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Parse a hex string into bytes.
///
/// Whitespace, `:` and `-` separators are ignored, so both `"10 08 15"` and
/// `"100815"` are accepted. Used for captured notification traces.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':' && *b != b'-')
        .collect();

    if digits.len() % 2 != 0 {
        return Err(Error::InvalidParameter {
            name: "hex".to_string(),
            value: text.to_string(),
        });
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| Error::InvalidParameter {
                    name: "hex".to_string(),
                    value: text.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kilograms_to_pounds() {
        assert!((kilograms_to_pounds(0.0) - 0.0).abs() < 0.001);
        assert!((kilograms_to_pounds(1.0) - 2.2046).abs() < 0.001);
        assert!((kilograms_to_pounds(72.0) - 158.733).abs() < 0.001);
    }

    #[test]
    fn test_weight_roundtrip() {
        let original = 81.35;
        let converted = pounds_to_kilograms(kilograms_to_pounds(original));
        assert!((converted - original).abs() < 0.0001);
    }

    #[test]
    fn test_hex_spaced() {
        assert_eq!(hex_spaced(&[]), "");
        assert_eq!(hex_spaced(&[0x0b]), "0b");
        assert_eq!(hex_spaced(&[0x1f, 0x05, 0x15, 0x10, 0x49]), "1f 05 15 10 49");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("10 08 15").unwrap(), vec![0x10, 0x08, 0x15]);
        assert_eq!(parse_hex("1C20").unwrap(), vec![0x1c, 0x20]);
        assert_eq!(parse_hex("aa:bb-cc").unwrap(), vec![0xaa, 0xbb, 0xcc]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_invalid() {
        assert!(parse_hex("123").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
