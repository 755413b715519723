//! The closed set of attribute data types and date-precision subtypes.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Wire data type of an attribute.
///
/// This is a closed enumeration: dictionaries may not introduce new types,
/// only use the ones listed here.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum AttributeType {
    Invalid = 0,
    String = 1,
    Octets = 2,
    Ipaddr = 3,
    Date = 4,
    Uint8 = 5,
    Uint16 = 6,
    Uint32 = 7,
    Uint64 = 8,
    Int8 = 9,
    Int16 = 10,
    Int32 = 11,
    Int64 = 12,
    Ifid = 13,
    Ipv6Addr = 14,
    Ipv6Prefix = 15,
    Ipv4Prefix = 16,
    Ether = 17,
    Combo = 18,
    Tlv = 19,
    Struct = 20,
    ExtendedAttr = 21,
    Vsa = 22,
    Vendor = 23,
    Group = 24,
    Abinary = 25,
    Max = 26,
}

impl AttributeType {
    /// True if the type may carry its own children (TLV-shaped parents).
    #[must_use]
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::Tlv | Self::Struct | Self::Vsa | Self::Vendor | Self::ExtendedAttr
        )
    }

    /// True if `VALUE` enumerations may legally attach to this type.
    #[must_use]
    pub fn admits_enum(self) -> bool {
        !matches!(
            self,
            Self::Abinary
                | Self::Tlv
                | Self::Struct
                | Self::Vsa
                | Self::Vendor
                | Self::ExtendedAttr
                | Self::Group
                | Self::Invalid
                | Self::Max
        )
    }

    /// True if the type has a fixed, known-in-advance wire width.
    #[must_use]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Uint8 | Self::Int8 => Some(1),
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Uint32 | Self::Int32 | Self::Ipaddr | Self::Date => Some(4),
            Self::Uint64 | Self::Int64 | Self::Ifid => Some(8),
            Self::Ipv6Addr => Some(16),
            Self::Ipv6Prefix => Some(18),
            Self::Ether => Some(6),
            _ => None,
        }
    }
}

/// Looks up an `AttributeType` by its dictionary-file spelling.
#[must_use]
pub fn type_by_name(name: &str) -> Option<AttributeType> {
    Some(match name {
        "string" => AttributeType::String,
        "octets" => AttributeType::Octets,
        "ipaddr" => AttributeType::Ipaddr,
        "date" => AttributeType::Date,
        "uint8" => AttributeType::Uint8,
        "uint16" => AttributeType::Uint16,
        "uint32" => AttributeType::Uint32,
        "uint64" => AttributeType::Uint64,
        "int8" => AttributeType::Int8,
        "int16" => AttributeType::Int16,
        "int32" => AttributeType::Int32,
        "int64" => AttributeType::Int64,
        "ifid" => AttributeType::Ifid,
        "ipv6addr" => AttributeType::Ipv6Addr,
        "ipv6prefix" => AttributeType::Ipv6Prefix,
        "ipv4prefix" => AttributeType::Ipv4Prefix,
        "ether" => AttributeType::Ether,
        "combo-ip" => AttributeType::Combo,
        "tlv" => AttributeType::Tlv,
        "struct" => AttributeType::Struct,
        "extended" => AttributeType::ExtendedAttr,
        "vsa" => AttributeType::Vsa,
        "vendor" => AttributeType::Vendor,
        "group" => AttributeType::Group,
        "abinary" => AttributeType::Abinary,
        _ => return None,
    })
}

/// Parses the type field of an `ATTRIBUTE`/`MEMBER` line, including the
/// optional `[N]` fixed-length suffix legal only on `octets`.
pub fn parse_type_field(text: &str) -> Result<(AttributeType, Option<u8>), String> {
    let (name, len) = match text.find('[') {
        Some(open) => {
            let close = text
                .find(']')
                .filter(|&c| c > open)
                .ok_or_else(|| format!("unterminated length suffix in '{text}'"))?;
            let n: u8 = text[open + 1..close]
                .parse()
                .map_err(|_| format!("invalid length suffix in '{text}'"))?;
            (&text[..open], Some(n))
        }
        None => (text, None),
    };

    let ty = type_by_name(name).ok_or_else(|| format!("unknown type '{name}'"))?;
    if let Some(n) = len {
        if ty != AttributeType::Octets {
            return Err(format!("length suffix only allowed on 'octets', not '{name}'"));
        }
        if n == 0 || n > 253 {
            return Err(format!("octets length {n} out of range (1..=253)"));
        }
    }
    Ok((ty, len))
}

/// Date-precision subtype carried in a date attribute's `type_size` flag.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DatePrecision {
    Seconds = 0,
    Minutes = 1,
    Hours = 2,
    Days = 3,
    Months = 4,
    Deciseconds = 5,
    Centiseconds = 6,
    Microseconds = 7,
    Nanoseconds = 8,
    UnixSeconds = 9,
    UnixMilliseconds = 10,
    UnixMicroseconds = 11,
    UnixNanoseconds = 12,
}

/// Table mapping date-precision flag tokens to their `DatePrecision` value.
pub const DATE_PRECISION_TABLE: &[(&str, DatePrecision)] = &[
    ("seconds", DatePrecision::Seconds),
    ("minutes", DatePrecision::Minutes),
    ("hours", DatePrecision::Hours),
    ("days", DatePrecision::Days),
    ("months", DatePrecision::Months),
    ("deciseconds", DatePrecision::Deciseconds),
    ("centiseconds", DatePrecision::Centiseconds),
    ("microseconds", DatePrecision::Microseconds),
    ("nanoseconds", DatePrecision::Nanoseconds),
    ("unix_seconds", DatePrecision::UnixSeconds),
    ("unix_milliseconds", DatePrecision::UnixMilliseconds),
    ("unix_microseconds", DatePrecision::UnixMicroseconds),
    ("unix_nanoseconds", DatePrecision::UnixNanoseconds),
];

/// Looks up a date precision token.
#[must_use]
pub fn date_precision_by_name(name: &str) -> Option<DatePrecision> {
    DATE_PRECISION_TABLE
        .iter()
        .find(|(tok, _)| *tok == name)
        .map(|(_, p)| *p)
}
