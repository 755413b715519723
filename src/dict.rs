//! The dictionary catalog: attribute tree, vendor table, and enum values.

use std::cell::Cell;
use std::collections::HashMap;

use crate::flags::FlagSet;
use crate::number::VendorFormat;
use crate::types::AttributeType;

/// Opaque handle to an attribute within a single `Dictionary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrId(pub(crate) usize);

/// A decoded value attached to a `VALUE` line. Only the variants the
/// value parser actually produces are modeled; unrecognized attribute
/// types never reach `parse_value` because `AttributeType::admits_enum`
/// is checked first.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

/// A node in the attribute tree.
///
/// `length` and `group_target` are the only fields mutated after
/// construction (struct-length accumulation and late group-ref linkage);
/// both are plain `Cell`s rather than anything requiring a lock, since a
/// dictionary is only ever touched from the single thread performing its
/// load.
#[derive(Debug)]
pub struct Attribute {
    pub name: String,
    pub number: u64,
    pub attr_type: AttributeType,
    pub parent: Option<AttrId>,
    pub flags: FlagSet,
    length: Cell<u8>,
    group_target: Cell<Option<(String, AttrId)>>,
}

impl Attribute {
    #[must_use]
    pub fn length(&self) -> u8 {
        self.length.get()
    }

    pub fn add_length(&self, delta: u8) {
        self.length.set(self.length.get().saturating_add(delta));
    }

    #[must_use]
    pub fn group_target(&self) -> Option<(String, AttrId)> {
        self.group_target.get()
    }

    pub fn set_group_target(&self, protocol: String, target: AttrId) {
        self.group_target.set(Some((protocol, target)));
    }
}

/// A vendor record (`VENDOR` declaration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vendor {
    pub name: String,
    pub number: u32,
    pub format: VendorFormat,
}

/// One `VALUE` alias attached to an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub attr: AttrId,
    pub alias: String,
    pub value: Value,
}

/// A fully- or partially-loaded protocol dictionary.
///
/// During a load this is mutated through `&self` (interior mutability is
/// confined to `Attribute::length`/`group_target`, see above, plus the
/// append-only tables below); once a load completes, callers are expected
/// to stop mutating it and may freely share it across threads via `Rc`
/// (or `Arc`, for callers who need `Sync`).
#[derive(Debug)]
pub struct Dictionary {
    pub protocol_name: String,
    pub protocol_number: u32,
    pub type_size: u8,
    attributes: Vec<Attribute>,
    children: HashMap<(Option<AttrId>, u64), AttrId>,
    by_name: HashMap<String, AttrId>,
    by_oid: HashMap<String, AttrId>,
    vendors_by_name: HashMap<String, Vendor>,
    vendors_by_number: HashMap<u32, String>,
    values_by_attr: HashMap<AttrId, Vec<EnumValue>>,
    values_by_alias: HashMap<(AttrId, String), Value>,
    root: AttrId,
}

impl Dictionary {
    /// Creates a new dictionary whose root attribute is the protocol itself.
    #[must_use]
    pub fn new(protocol_name: &str, protocol_number: u32, type_size: u8) -> Self {
        let mut attributes = Vec::new();
        let mut flags = FlagSet::default();
        flags.set_root();
        attributes.push(Attribute {
            name: protocol_name.to_string(),
            number: u64::from(protocol_number),
            attr_type: AttributeType::Tlv,
            parent: None,
            flags,
            length: Cell::new(0),
            group_target: Cell::new(None),
        });
        let root = AttrId(0);
        let mut by_name = HashMap::new();
        by_name.insert(protocol_name.to_ascii_lowercase(), root);

        Self {
            protocol_name: protocol_name.to_string(),
            protocol_number,
            type_size,
            attributes,
            children: HashMap::new(),
            by_name,
            by_oid: HashMap::new(),
            vendors_by_name: HashMap::new(),
            vendors_by_number: HashMap::new(),
            values_by_attr: HashMap::new(),
            values_by_alias: HashMap::new(),
            root,
        }
    }

    #[must_use]
    pub fn root(&self) -> AttrId {
        self.root
    }

    #[must_use]
    pub fn attr(&self, id: AttrId) -> &Attribute {
        &self.attributes[id.0]
    }

    /// Adds a new attribute under `parent`. Fails if the name or number
    /// collides with an existing sibling.
    pub fn add_attribute(
        &mut self,
        parent: AttrId,
        name: &str,
        number: u64,
        attr_type: AttributeType,
        flags: FlagSet,
    ) -> std::result::Result<AttrId, (String, usize)> {
        self.add_attribute_raw(Some(parent), name, number, attr_type, flags)
    }

    pub(crate) fn add_attribute_raw(
        &mut self,
        parent: Option<AttrId>,
        name: &str,
        number: u64,
        attr_type: AttributeType,
        flags: FlagSet,
    ) -> std::result::Result<AttrId, (String, usize)> {
        let key = name.to_ascii_lowercase();
        if self.by_name.contains_key(&key) {
            return Err((format!("attribute '{name}' already defined"), 0));
        }
        if self.children.contains_key(&(parent, number)) {
            return Err((
                format!("attribute number {number} already used under this parent"),
                0,
            ));
        }

        let id = AttrId(self.attributes.len());
        self.attributes.push(Attribute {
            name: name.to_string(),
            number,
            attr_type,
            parent,
            flags,
            length: Cell::new(0),
            group_target: Cell::new(None),
        });
        self.by_name.insert(key, id);
        self.children.insert((parent, number), id);

        let oid = self.oid_string(id);
        self.by_oid.insert(oid, id);

        Ok(id)
    }

    #[must_use]
    pub fn child_by_number(&self, parent: AttrId, number: u64) -> Option<AttrId> {
        self.children.get(&(Some(parent), number)).copied()
    }

    /// True if any ancestor of `id` (including `id` itself) is a `vsa`.
    #[must_use]
    pub fn is_under_vsa(&self, id: AttrId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if self.attributes[c.0].attr_type == AttributeType::Vsa {
                return true;
            }
            cur = self.attributes[c.0].parent;
        }
        false
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<AttrId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    #[must_use]
    pub fn by_oid(&self, oid: &str) -> Option<AttrId> {
        self.by_oid.get(oid).copied()
    }

    fn oid_string(&self, mut id: AttrId) -> String {
        let mut parts = Vec::new();
        loop {
            let attr = &self.attributes[id.0];
            parts.push(attr.number.to_string());
            match attr.parent {
                Some(p) if !self.attributes[p.0].flags.is_root() => id = p,
                _ => break,
            }
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn add_vendor(&mut self, vendor: Vendor) -> std::result::Result<(), (String, usize)> {
        if let Some(existing) = self.vendors_by_name.get(&vendor.name) {
            if *existing != vendor {
                return Err((format!("vendor '{}' redefined incompatibly", vendor.name), 0));
            }
            return Ok(());
        }
        self.vendors_by_number
            .insert(vendor.number, vendor.name.clone());
        self.vendors_by_name.insert(vendor.name.clone(), vendor);
        Ok(())
    }

    #[must_use]
    pub fn vendor_by_name(&self, name: &str) -> Option<&Vendor> {
        self.vendors_by_name.get(name)
    }

    #[must_use]
    pub fn vendor_by_number(&self, number: u32) -> Option<&Vendor> {
        self.vendors_by_number
            .get(&number)
            .and_then(|name| self.vendors_by_name.get(name))
    }

    pub fn add_enum(
        &mut self,
        attr: AttrId,
        alias: &str,
        value: Value,
    ) -> std::result::Result<(), (String, usize)> {
        let key = (attr, alias.to_string());
        if self.values_by_alias.contains_key(&key) {
            return Err((format!("value '{alias}' already defined"), 0));
        }
        self.values_by_alias.insert(key, value.clone());
        self.values_by_attr.entry(attr).or_default().push(EnumValue {
            attr,
            alias: alias.to_string(),
            value,
        });
        Ok(())
    }

    #[must_use]
    pub fn enum_by_alias(&self, attr: AttrId, alias: &str) -> Option<&Value> {
        self.values_by_alias.get(&(attr, alias.to_string()))
    }

    #[must_use]
    pub fn enums_of(&self, attr: AttrId) -> &[EnumValue] {
        self.values_by_attr
            .get(&attr)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Forces every hash table's bucket storage to materialize, so that no
    /// first-lookup rehash can be observed by a reader after the dictionary
    /// is published. `std::collections::HashMap` never rehashes on read, so
    /// this has no functional effect in Rust; it is kept to preserve the
    /// "warm tables before publish" property as an explicit, auditable step
    /// rather than an implicit non-issue.
    pub fn warm_up(&self) {
        for _ in self.by_name.iter() {}
        for _ in self.by_oid.iter() {}
        for _ in self.vendors_by_name.iter() {}
        for _ in self.values_by_alias.iter() {}
    }
}

/// Parses `text` into a `Value` appropriate for `attr_type`.
pub fn parse_value(attr_type: AttributeType, text: &str) -> std::result::Result<Value, String> {
    use AttributeType::*;
    match attr_type {
        Uint8 | Uint16 | Uint32 | Uint64 | Ipaddr | Date => crate::number::parse_uint(text)
            .map(Value::Uint)
            .map_err(|e| e.to_string()),
        Int8 | Int16 | Int32 | Int64 => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("invalid integer '{text}'")),
        String | Ifid | Ipv6Addr | Ipv6Prefix | Ipv4Prefix | Ether => {
            Ok(Value::Str(text.to_string()))
        }
        Octets => parse_octets(text).map(Value::Bytes),
        Combo => Ok(Value::Str(text.to_string())),
        other => Err(format!("type {other:?} does not admit a parsed value")),
    }
}

fn parse_octets(text: &str) -> std::result::Result<Vec<u8>, String> {
    let hex = text.strip_prefix("0x").ok_or("octets value must be 0x-prefixed")?;
    if hex.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| "bad hex digit".to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagSet;

    fn fresh() -> Dictionary {
        Dictionary::new("test", 42, 1)
    }

    #[test]
    fn root_is_registered() {
        let d = fresh();
        assert_eq!(d.by_name("test"), Some(d.root()));
    }

    #[test]
    fn root_is_a_tlv() {
        let d = fresh();
        assert_eq!(d.attr(d.root()).attr_type, AttributeType::Tlv);
    }

    #[test]
    fn is_under_vsa_detects_vsa_ancestor() {
        let mut d = fresh();
        let vsa = d
            .add_attribute(d.root(), "Vendor-Specific", 26, AttributeType::Vsa, FlagSet::default())
            .unwrap();
        let vendor = d
            .add_attribute(vsa, "Acme", 10, AttributeType::Vendor, FlagSet::default())
            .unwrap();
        let sub = d
            .add_attribute(vendor, "Sub", 1, AttributeType::Uint8, FlagSet::default())
            .unwrap();
        assert!(d.is_under_vsa(sub));
        assert!(!d.is_under_vsa(d.root()));
    }

    #[test]
    fn add_and_find_attribute() {
        let mut d = fresh();
        let id = d
            .add_attribute(d.root(), "Foo", 1, AttributeType::Uint32, FlagSet::default())
            .unwrap();
        assert_eq!(d.by_name("foo"), Some(id));
        assert_eq!(d.child_by_number(d.root(), 1), Some(id));
        assert_eq!(d.by_oid("1"), Some(id));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut d = fresh();
        d.add_attribute(d.root(), "Foo", 1, AttributeType::Uint32, FlagSet::default())
            .unwrap();
        assert!(d
            .add_attribute(d.root(), "Foo", 2, AttributeType::Uint32, FlagSet::default())
            .is_err());
    }

    #[test]
    fn duplicate_number_rejected() {
        let mut d = fresh();
        d.add_attribute(d.root(), "Foo", 1, AttributeType::Uint32, FlagSet::default())
            .unwrap();
        assert!(d
            .add_attribute(d.root(), "Bar", 1, AttributeType::Uint32, FlagSet::default())
            .is_err());
    }

    #[test]
    fn enum_values_round_trip() {
        let mut d = fresh();
        let id = d
            .add_attribute(d.root(), "Foo", 1, AttributeType::Uint32, FlagSet::default())
            .unwrap();
        d.add_enum(id, "Bar", Value::Uint(7)).unwrap();
        assert_eq!(d.enum_by_alias(id, "Bar"), Some(&Value::Uint(7)));
        assert_eq!(d.enums_of(id).len(), 1);
    }

    #[test]
    fn parses_octet_values() {
        assert_eq!(
            parse_value(AttributeType::Octets, "0x0a0b").unwrap(),
            Value::Bytes(vec![0x0a, 0x0b])
        );
        assert!(parse_value(AttributeType::Octets, "0x0a0").is_err());
    }
}
