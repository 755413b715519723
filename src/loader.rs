//! Public entry points: resource-limit configuration, the published
//! protocol table, and the internal dictionary every load starts from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::dict::Dictionary;
use crate::engine::{self, LoadContext};
use crate::error::{DictError, DictErrorKind};
use crate::flags::FlagSet;
use crate::types::AttributeType;

type Result<T> = std::result::Result<T, DictError>;

/// Tunables governing resource limits and security enforcement during a
/// load. Defaults match the historical RADIUS dictionary tooling these
/// files are usually fed to.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Longest a single source line may be before the load fails.
    pub max_line_len: usize,
    /// Deepest a chain of `$INCLUDE`/`$INCLUDE-` directives may nest.
    pub max_include_depth: usize,
    /// Reject world-writable dictionary files before reading them.
    pub enforce_file_security: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_line_len: 255,
            max_include_depth: 64,
            enforce_file_security: true,
        }
    }
}

/// Published protocol dictionaries, keyed by protocol name and number.
///
/// A `Dictionary` enters this table only once fully loaded (`END-PROTOCOL`
/// seen, or the root load finished); from then on it is shared read-only
/// through `Rc`, never mutated again.
#[derive(Debug, Default)]
pub struct ProtocolTable {
    by_name: HashMap<String, Rc<Dictionary>>,
    by_number: HashMap<u32, String>,
}

impl ProtocolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, dict: Rc<Dictionary>) {
        self.by_number
            .insert(dict.protocol_number, dict.protocol_name.clone());
        self.by_name.insert(dict.protocol_name.clone(), dict);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<Dictionary>> {
        self.by_name.get(name).cloned()
    }

    #[must_use]
    pub fn get_by_number(&self, number: u32) -> Option<Rc<Dictionary>> {
        self.by_number
            .get(&number)
            .and_then(|name| self.by_name.get(name))
            .cloned()
    }

    #[must_use]
    pub fn protocol_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

/// The attribute types the internal dictionary synthesizes a
/// `Tmp-Cast-<Type>` attribute for. Structural and enumeration-only types
/// (`tlv`, `struct`, `vsa`, `vendor`, `group`, `abinary`'s container kin)
/// have no meaningful cast target and are excluded.
const CASTABLE_TYPES: &[AttributeType] = &[
    AttributeType::String,
    AttributeType::Octets,
    AttributeType::Ipaddr,
    AttributeType::Date,
    AttributeType::Uint8,
    AttributeType::Uint16,
    AttributeType::Uint32,
    AttributeType::Uint64,
    AttributeType::Int8,
    AttributeType::Int16,
    AttributeType::Int32,
    AttributeType::Int64,
    AttributeType::Ifid,
    AttributeType::Ipv6Addr,
    AttributeType::Ipv6Prefix,
    AttributeType::Ipv4Prefix,
    AttributeType::Ether,
];

fn cast_type_name(ty: AttributeType) -> &'static str {
    match ty {
        AttributeType::String => "String",
        AttributeType::Octets => "Octets",
        AttributeType::Ipaddr => "Ipaddr",
        AttributeType::Date => "Date",
        AttributeType::Uint8 => "Uint8",
        AttributeType::Uint16 => "Uint16",
        AttributeType::Uint32 => "Uint32",
        AttributeType::Uint64 => "Uint64",
        AttributeType::Int8 => "Int8",
        AttributeType::Int16 => "Int16",
        AttributeType::Int32 => "Int32",
        AttributeType::Int64 => "Int64",
        AttributeType::Ifid => "Ifid",
        AttributeType::Ipv6Addr => "Ipv6addr",
        AttributeType::Ipv6Prefix => "Ipv6prefix",
        AttributeType::Ipv4Prefix => "Ipv4prefix",
        AttributeType::Ether => "Ether",
        _ => "Unknown",
    }
}

/// Loads dictionary files rooted at a single directory tree.
///
/// `root_dir` is the directory a bare protocol name like `"dhcpv4"` is
/// resolved against: `root_dir/dhcpv4/dictionary`.
#[derive(Debug, Clone)]
pub struct Loader {
    root_dir: PathBuf,
    config: LoaderConfig,
}

impl Loader {
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>, config: LoaderConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            config,
        }
    }

    pub(crate) fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Builds and publishes the internal dictionary: the `Tmp-Cast-<Type>`
    /// attributes every protocol may target from an untyped `group` ref or
    /// coercion site, plus (if `root_dir/dictionary` exists) whatever
    /// top-level `ATTRIBUTE`/`VALUE`/`PROTOCOL` content that file declares.
    pub fn load_internal(&self, protocols: &mut ProtocolTable) -> Result<Rc<Dictionary>> {
        let mut dict = Dictionary::new("internal", 0, 1);
        let root = dict.root();
        for (i, ty) in CASTABLE_TYPES.iter().enumerate() {
            let name = format!("Tmp-Cast-{}", cast_type_name(*ty));
            dict.add_attribute(root, &name, i as u64 + 1, *ty, FlagSet::default())
                .map_err(|(msg, _)| DictError::new(DictErrorKind::Syntax(msg), &self.root_dir, 0))?;
        }

        let mut ctx = LoadContext::start_as_internal(dict);
        let path = self.root_dir.join("dictionary");
        if path.is_file() {
            engine::process_file(&path, &mut ctx, self, protocols, 0)?;
            if ctx.stack.named_depth() != 0 {
                return Err(DictError::new(
                    DictErrorKind::Context("unterminated block at end of file".to_string()),
                    &path,
                    0,
                ));
            }
        }
        engine::resolve_fixups(&mut ctx, self, protocols, &path, 0)?;

        let dict = ctx.dict.take().expect("internal dictionary always present");
        dict.warm_up();
        let rc = Rc::new(dict);
        protocols.insert(rc.clone());
        Ok(rc)
    }

    /// Loads `root_dir/<name>/dictionary`, a single `PROTOCOL`-declared
    /// top-level dictionary, and publishes it.
    pub fn load_protocol(&self, protocols: &mut ProtocolTable, name: &str) -> Result<Rc<Dictionary>> {
        self.load_protocol_with(protocols, name)
    }

    /// Same as `load_protocol`, but also the lazy secondary-load path the
    /// engine takes when a cross-protocol `group ref=PROTO.ATTR` names a
    /// protocol not yet in `protocols`.
    pub(crate) fn load_protocol_with(
        &self,
        protocols: &mut ProtocolTable,
        name: &str,
    ) -> Result<Rc<Dictionary>> {
        if let Some(existing) = protocols.get(name) {
            return Ok(existing);
        }

        let path = self.root_dir.join(name).join("dictionary");
        let mut ctx = LoadContext::new();
        engine::process_file(&path, &mut ctx, self, protocols, 0)?;
        if ctx.stack.named_depth() != 0 {
            return Err(DictError::new(
                DictErrorKind::Context("unterminated block at end of file".to_string()),
                &path,
                0,
            ));
        }
        engine::resolve_fixups(&mut ctx, self, protocols, &path, 0)?;

        let dict = ctx.dict.take().ok_or_else(|| {
            DictError::new(
                DictErrorKind::Syntax(format!("{} declares no PROTOCOL", path.display())),
                &path,
                0,
            )
        })?;
        if !dict.protocol_name.eq_ignore_ascii_case(name) {
            return Err(DictError::new(
                DictErrorKind::Reference(format!(
                    "{} declares protocol '{}', expected '{name}'",
                    path.display(),
                    dict.protocol_name
                )),
                &path,
                0,
            ));
        }
        dict.warm_up();
        let rc = Rc::new(dict);
        protocols.insert(rc.clone());
        Ok(rc)
    }
}
