//! Numeric literal and `format=` clause parsing.

use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    Empty,
    Invalid(String),
    Overflow(String),
    BadFormat(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty numeric field"),
            Self::Invalid(s) => write!(f, "invalid number '{s}'"),
            Self::Overflow(s) => write!(f, "number '{s}' out of range"),
            Self::BadFormat(s) => write!(f, "invalid format clause '{s}'"),
        }
    }
}

impl std::error::Error for Error {}

/// Parses a decimal or `0x`/`0X`-prefixed hexadecimal integer.
///
/// Stops at (and does not consume) a `.`, so the same helper can be reused
/// to read the leading component of an OID string.
pub fn parse_uint(text: &str) -> Result<u64, Error> {
    if text.is_empty() {
        return Err(Error::Empty);
    }
    let digits = match text.split_once('.') {
        Some((head, _)) => head,
        None => text,
    };
    if digits.is_empty() {
        return Err(Error::Invalid(text.to_string()));
    }
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| Error::Invalid(text.to_string()))
    } else {
        digits
            .parse::<u64>()
            .map_err(|_| Error::Invalid(text.to_string()))
    }
}

/// Parses a small unsigned field into a target integer type, checking range.
pub fn parse_bounded(text: &str, max: u64) -> Result<u64, Error> {
    let v = parse_uint(text)?;
    if v > max {
        return Err(Error::Overflow(text.to_string()));
    }
    Ok(v)
}

/// Splits an OID-like string (`1.2.3` or `.4`) into its components.
///
/// A leading empty component (from a leading `.`) marks the OID as relative
/// to the engine's current "attention" attribute.
#[must_use]
pub fn split_oid(text: &str) -> (bool, Vec<&str>) {
    let relative = text.starts_with('.');
    let trimmed = text.strip_prefix('.').unwrap_or(text);
    (relative, trimmed.split('.').collect())
}

/// A parsed `format=T,L[,c]` vendor clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorFormat {
    pub type_size: u8,
    pub length_size: u8,
    pub continuation: bool,
}

impl Default for VendorFormat {
    fn default() -> Self {
        Self {
            type_size: 1,
            length_size: 1,
            continuation: false,
        }
    }
}

/// Parses the `T,L[,c]` portion of a `format=` clause (the `format=` prefix
/// itself is stripped by the caller).
pub fn parse_vendor_format(text: &str) -> Result<VendorFormat, Error> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(Error::BadFormat(text.to_string()));
    }
    let type_size = parse_bounded(parts[0], 4)? as u8;
    if ![1, 2, 4].contains(&type_size) {
        return Err(Error::BadFormat(text.to_string()));
    }
    let length_size = parse_bounded(parts[1], 2)? as u8;
    if ![0, 1, 2].contains(&length_size) {
        return Err(Error::BadFormat(text.to_string()));
    }
    let continuation = match parts.get(2) {
        None => false,
        Some(&"c") => true,
        Some(_) => return Err(Error::BadFormat(text.to_string())),
    };
    Ok(VendorFormat {
        type_size,
        length_size,
        continuation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex() {
        assert_eq!(parse_uint("26").unwrap(), 26);
        assert_eq!(parse_uint("0x1a").unwrap(), 26);
        assert_eq!(parse_uint("0X1A").unwrap(), 26);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_uint("").is_err());
        assert!(parse_uint("abc").is_err());
    }

    #[test]
    fn stops_at_dot() {
        assert_eq!(parse_uint("26.1").unwrap(), 26);
    }

    #[test]
    fn splits_relative_oid() {
        let (rel, parts) = split_oid(".1.2");
        assert!(rel);
        assert_eq!(parts, vec!["1", "2"]);
        let (rel, parts) = split_oid("1.2.3");
        assert!(!rel);
        assert_eq!(parts, vec!["1", "2", "3"]);
    }

    #[test]
    fn parses_vendor_format() {
        let f = parse_vendor_format("1,1,c").unwrap();
        assert_eq!(
            f,
            VendorFormat {
                type_size: 1,
                length_size: 1,
                continuation: true
            }
        );
        let f = parse_vendor_format("2,1").unwrap();
        assert!(!f.continuation);
    }

    #[test]
    fn rejects_bad_vendor_format() {
        assert!(parse_vendor_format("3,1").is_err());
        assert!(parse_vendor_format("1,3").is_err());
        assert!(parse_vendor_format("1,1,x").is_err());
    }
}
