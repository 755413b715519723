//! The attribute flag set and its `key[=value],...` parser.

use bitflags::bitflags;
use std::fmt;

use crate::types::{self, AttributeType};

bitflags! {
    /// Boolean components of a flag set; the non-boolean components
    /// (`encrypt`, `length`, `type_size`) live alongside these in `FlagSet`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlagBits: u16 {
        const IS_ROOT  = 1 << 0;
        const INTERNAL = 1 << 1;
        const HAS_TAG  = 1 << 2;
        const ARRAY    = 1 << 3;
        const CONCAT   = 1 << 4;
        const VIRTUAL  = 1 << 5;
        /// Overloaded: `long` under `extended`, `key` under an unsigned integer.
        const EXTRA    = 1 << 6;
    }
}

/// The full parsed flag set of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSet {
    bits: FlagBits,
    pub encrypt: u8,
    pub length: u8,
    pub type_size: u8,
}

impl FlagSet {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.bits.contains(FlagBits::IS_ROOT)
    }

    #[must_use]
    pub fn internal(&self) -> bool {
        self.bits.contains(FlagBits::INTERNAL)
    }

    #[must_use]
    pub fn has_tag(&self) -> bool {
        self.bits.contains(FlagBits::HAS_TAG)
    }

    #[must_use]
    pub fn array(&self) -> bool {
        self.bits.contains(FlagBits::ARRAY)
    }

    #[must_use]
    pub fn concat(&self) -> bool {
        self.bits.contains(FlagBits::CONCAT)
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.bits.contains(FlagBits::VIRTUAL)
    }

    #[must_use]
    pub fn extra(&self) -> bool {
        self.bits.contains(FlagBits::EXTRA)
    }

    pub fn set_root(&mut self) {
        self.bits.insert(FlagBits::IS_ROOT);
    }

    pub fn set_internal(&mut self, value: bool) {
        self.bits.set(FlagBits::INTERNAL, value);
    }

    /// Accumulates `delta` bytes into `length`, saturating at 255 as the
    /// struct-length accumulator the engine drives never legally exceeds
    /// that width.
    pub fn add_length(&mut self, delta: u8) {
        self.length = self.length.saturating_add(delta);
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    UnknownKey(String),
    IllegalForType(String, AttributeType),
    BadValue(String),
    Conflict(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey(k) => write!(f, "unknown flag '{k}'"),
            Self::IllegalForType(k, t) => write!(f, "flag '{k}' not allowed on type {t:?}"),
            Self::BadValue(k) => write!(f, "bad value for flag '{k}'"),
            Self::Conflict(msg) => write!(f, "conflicting flags: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Result of parsing one flag field: the flag set, plus a `ref=` target
/// string if a `group`-typed attribute carried one (the engine resolves
/// that string against the dictionary; this module has no catalog access).
#[derive(Debug, Clone, Default)]
pub struct ParsedFlags {
    pub flags: FlagSet,
    pub group_ref: Option<String>,
}

/// Parses the comma-separated flag field of an `ATTRIBUTE`/`MEMBER` line.
pub fn parse_flags(text: &str, attr_type: AttributeType) -> Result<ParsedFlags, Error> {
    let mut out = ParsedFlags::default();
    if text.is_empty() {
        return Ok(out);
    }

    for item in text.split(',') {
        let (key, value) = match item.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (item, None),
        };

        match key {
            "has_tag" => {
                if !matches!(attr_type, AttributeType::Uint32 | AttributeType::String) {
                    return Err(Error::IllegalForType(key.to_string(), attr_type));
                }
                out.flags.bits.insert(FlagBits::HAS_TAG);
            }
            "encrypt" => {
                let v = value.ok_or_else(|| Error::BadValue(key.to_string()))?;
                let n: u8 = v.parse().map_err(|_| Error::BadValue(key.to_string()))?;
                if n > 3 {
                    return Err(Error::BadValue(key.to_string()));
                }
                out.flags.encrypt = n;
            }
            "internal" => out.flags.bits.insert(FlagBits::INTERNAL),
            "array" => out.flags.bits.insert(FlagBits::ARRAY),
            "concat" => {
                if attr_type != AttributeType::Octets {
                    return Err(Error::IllegalForType(key.to_string(), attr_type));
                }
                out.flags.bits.insert(FlagBits::CONCAT);
            }
            "virtual" => out.flags.bits.insert(FlagBits::VIRTUAL),
            "long" => {
                if attr_type != AttributeType::ExtendedAttr {
                    return Err(Error::IllegalForType(key.to_string(), attr_type));
                }
                out.flags.bits.insert(FlagBits::EXTRA);
            }
            "key" => {
                if !matches!(
                    attr_type,
                    AttributeType::Uint8 | AttributeType::Uint16 | AttributeType::Uint32
                ) {
                    return Err(Error::IllegalForType(key.to_string(), attr_type));
                }
                out.flags.bits.insert(FlagBits::EXTRA);
            }
            "ref" => {
                if attr_type != AttributeType::Group {
                    return Err(Error::IllegalForType(key.to_string(), attr_type));
                }
                let v = value.ok_or_else(|| Error::BadValue(key.to_string()))?;
                out.group_ref = Some(v.to_string());
            }
            other => {
                if attr_type == AttributeType::Date {
                    if let Some(width) = width_token(other) {
                        out.flags.type_size = width;
                        continue;
                    }
                    if let Some(precision) = types::date_precision_by_name(other) {
                        out.flags.type_size = precision as u8;
                        continue;
                    }
                }
                return Err(Error::UnknownKey(other.to_string()));
            }
        }
    }

    Ok(out)
}

fn width_token(token: &str) -> Option<u8> {
    match token {
        "uint16" => Some(16),
        "uint32" => Some(32),
        "uint64" => Some(64),
        _ => None,
    }
}

/// Central validator: the concrete `flags_valid` collaborator, consulted
/// after type and flag parsing both succeed.
#[must_use]
pub fn flags_valid(attr_type: AttributeType, flags: &FlagSet, parent_is_struct: bool) -> bool {
    if flags.array() && attr_type.is_structural() {
        return false;
    }
    if flags.has_tag() && parent_is_struct {
        return false;
    }
    if flags.extra() && attr_type == AttributeType::ExtendedAttr && parent_is_struct {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_flags() {
        let p = parse_flags("array,internal", AttributeType::Uint32).unwrap();
        assert!(p.flags.array());
        assert!(p.flags.internal());
    }

    #[test]
    fn has_tag_requires_compatible_type() {
        assert!(parse_flags("has_tag", AttributeType::Uint32).is_ok());
        assert!(parse_flags("has_tag", AttributeType::Ipaddr).is_err());
    }

    #[test]
    fn encrypt_range_checked() {
        assert!(parse_flags("encrypt=3", AttributeType::Uint32).is_ok());
        assert!(parse_flags("encrypt=9", AttributeType::Uint32).is_err());
    }

    #[test]
    fn ref_only_on_group() {
        let p = parse_flags("ref=Foo", AttributeType::Group).unwrap();
        assert_eq!(p.group_ref.as_deref(), Some("Foo"));
        assert!(parse_flags("ref=Foo", AttributeType::Uint32).is_err());
    }

    #[test]
    fn date_precision_token_accepted() {
        let p = parse_flags("microseconds", AttributeType::Date).unwrap();
        assert!(p.flags.type_size > 0);
    }

    #[test]
    fn unknown_flag_rejected() {
        assert!(parse_flags("bogus", AttributeType::Uint32).is_err());
    }
}
