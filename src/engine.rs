//! Directive dispatch: reads dictionary files line by line, maintains the
//! context stack, and drives catalog writes.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::context::{ContextStack, Frame, FrameTag};
use crate::dict::{self, AttrId, Dictionary, Value, Vendor};
use crate::error::{DictError, DictErrorKind};
use crate::fixup::{EnumFixup, FixupPool, GroupFixup};
use crate::flags::{self, FlagSet};
use crate::line;
use crate::loader::{Loader, ProtocolTable};
use crate::number;
use crate::types::{self, AttributeType};

type Result<T> = std::result::Result<T, DictError>;

/// Mutable state threaded through one root `load_protocol`/`load_internal`
/// call, including any nested `BEGIN-PROTOCOL` blocks it opens.
pub(crate) struct LoadContext {
    pub dict: Option<Dictionary>,
    pub dict_is_internal: bool,
    pub pending: HashMap<String, Dictionary>,
    pub suspended: Option<Dictionary>,
    pub stack: ContextStack,
    pub relative_attr: Option<AttrId>,
    pub value_cache: Option<(String, AttrId)>,
    pub fixups: FixupPool,
    pub baseline_internal: bool,
}

impl LoadContext {
    pub(crate) fn new() -> Self {
        Self {
            dict: None,
            dict_is_internal: false,
            pending: HashMap::new(),
            suspended: None,
            stack: ContextStack::new(),
            relative_attr: None,
            value_cache: None,
            fixups: FixupPool::new(),
            baseline_internal: false,
        }
    }

    /// Marks this context as loading the internal dictionary, the only
    /// place `PROTOCOL`/`BEGIN-PROTOCOL` may declare and open nested
    /// protocol blocks.
    pub(crate) fn start_as_internal(dict: Dictionary) -> Self {
        let mut ctx = Self::new();
        ctx.dict = Some(dict);
        ctx.dict_is_internal = true;
        ctx
    }
}

fn no_protocol_open(file: &Path, line: usize) -> DictError {
    context_err("no protocol is open yet", file, line)
}

fn syntax(msg: impl Into<String>, file: &Path, line: usize) -> DictError {
    DictError::new(DictErrorKind::Syntax(msg.into()), file, line)
}

fn context_err(msg: impl Into<String>, file: &Path, line: usize) -> DictError {
    DictError::new(DictErrorKind::Context(msg.into()), file, line)
}

fn reference_err(msg: impl Into<String>, file: &Path, line: usize) -> DictError {
    DictError::new(DictErrorKind::Reference(msg.into()), file, line)
}

fn type_flag_err(msg: impl Into<String>, file: &Path, line: usize) -> DictError {
    DictError::new(DictErrorKind::TypeFlag(msg.into()), file, line)
}

fn resource_err(msg: impl Into<String>, file: &Path, line: usize) -> DictError {
    DictError::new(DictErrorKind::Resource(msg.into()), file, line)
}

fn stack_overflow(file: &Path, line: usize) -> DictError {
    resource_err(
        format!("context stack depth exceeds {}", crate::context::MAX_DEPTH),
        file,
        line,
    )
}

fn frame_tag_label(tag: FrameTag) -> &'static str {
    match tag {
        FrameTag::Protocol => "PROTOCOL",
        FrameTag::Vendor => "VENDOR",
        FrameTag::Tlv => "TLV",
        FrameTag::Auto => "???",
    }
}

/// Closes the named frame on top of the context stack, or reports a
/// mismatch naming the actual inner frame the close ran into.
fn close_frame(
    ctx: &mut LoadContext,
    tag: FrameTag,
    label: &str,
    name: &str,
    file: &Path,
    line: usize,
) -> Result<Frame> {
    ctx.stack.close(tag, name).map_err(|mismatch| match mismatch {
        Some(frame) => context_err(
            format!(
                "END-{label} {name} with mismatched BEGIN-{} {}",
                frame_tag_label(frame.tag),
                frame.name
            ),
            file,
            line,
        ),
        None => context_err(format!("END-{label} {name} has no matching BEGIN-{label}"), file, line),
    })
}

/// Reads one dictionary file, dispatching each line to the engine.
pub(crate) fn process_file(
    path: &Path,
    ctx: &mut LoadContext,
    loader: &Loader,
    protocols: &mut ProtocolTable,
    include_depth: usize,
) -> Result<()> {
    log::debug!("loading dictionary file {}", path.display());

    let metadata = std::fs::metadata(path)
        .map_err(|e| DictError::new(DictErrorKind::Io(e.to_string()), path, 0))?;
    if !metadata.is_file() {
        return Err(DictError::new(
            DictErrorKind::Security("not a regular file".to_string()),
            path,
            0,
        ));
    }
    if loader.config().enforce_file_security {
        check_not_world_writable(path, &metadata)?;
    }

    let file = std::fs::File::open(path)
        .map_err(|e| DictError::new(DictErrorKind::Io(e.to_string()), path, 0))?;
    let reader = std::io::BufReader::new(file);

    for (idx, raw) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let raw = raw.map_err(|e| DictError::new(DictErrorKind::Io(e.to_string()), path, lineno))?;
        if raw.len() > loader.config().max_line_len {
            return Err(resource_err(
                format!("line exceeds {} bytes", loader.config().max_line_len),
                path,
                lineno,
            ));
        }
        process_line(&raw, path, lineno, ctx, loader, protocols, include_depth)?;
    }

    Ok(())
}

#[cfg(unix)]
fn check_not_world_writable(path: &Path, metadata: &std::fs::Metadata) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o002 != 0 {
        return Err(DictError::new(
            DictErrorKind::Security("dictionary file is world-writable".to_string()),
            path,
            0,
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_not_world_writable(_path: &Path, _metadata: &std::fs::Metadata) -> Result<()> {
    log::warn!("world-writable check skipped: not supported on this platform");
    Ok(())
}

fn process_line(
    raw: &str,
    file: &Path,
    lineno: usize,
    ctx: &mut LoadContext,
    loader: &Loader,
    protocols: &mut ProtocolTable,
    include_depth: usize,
) -> Result<()> {
    let fields = line::tokenize(raw);
    if fields.is_empty() {
        return Ok(());
    }
    let keyword = fields.get(0).unwrap();

    if keyword.eq_ignore_ascii_case("$INCLUDE") || keyword.eq_ignore_ascii_case("$INCLUDE-") {
        let soft = keyword.eq_ignore_ascii_case("$INCLUDE-");
        let target = fields
            .get(1)
            .ok_or_else(|| syntax("$INCLUDE requires a path", file, lineno))?;
        return handle_include(target, soft, file, lineno, ctx, loader, protocols, include_depth);
    }

    match keyword.to_ascii_uppercase().as_str() {
        "ATTRIBUTE" => handle_attribute(fields.as_slice(), file, lineno, ctx),
        "MEMBER" => handle_member(fields.as_slice(), file, lineno, ctx),
        "STRUCT" => handle_struct(fields.as_slice(), file, lineno, ctx),
        "VALUE" => handle_value(fields.as_slice(), file, lineno, ctx),
        "FLAGS" => handle_flags(fields.as_slice(), file, lineno, ctx),
        "VENDOR" => handle_vendor(fields.as_slice(), file, lineno, ctx),
        "PROTOCOL" => handle_protocol(fields.as_slice(), file, lineno, ctx),
        "BEGIN-PROTOCOL" => handle_begin_protocol(fields.as_slice(), file, lineno, ctx),
        "END-PROTOCOL" => handle_end_protocol(fields.as_slice(), file, lineno, ctx, loader, protocols),
        "BEGIN-TLV" => handle_begin_tlv(fields.as_slice(), file, lineno, ctx),
        "END-TLV" => handle_end_tlv(fields.as_slice(), file, lineno, ctx),
        "BEGIN-VENDOR" => handle_begin_vendor(fields.as_slice(), file, lineno, ctx),
        "END-VENDOR" => handle_end_vendor(fields.as_slice(), file, lineno, ctx),
        other => Err(syntax(format!("unknown directive '{other}'"), file, lineno)),
    }
}

fn require_arity(fields: &[&str], min: usize, file: &Path, line: usize) -> Result<()> {
    if fields.len() < min {
        return Err(syntax(
            format!("'{}' requires at least {} fields", fields[0], min - 1),
            file,
            line,
        ));
    }
    Ok(())
}

/// Resolves the attribute an `oid` string addresses, walking through
/// existing children for every component but the last.
fn resolve_oid_parent(
    dict: &Dictionary,
    base: AttrId,
    parts: &[&str],
    file: &Path,
    line: usize,
) -> Result<(AttrId, u64)> {
    let mut current = base;
    for part in &parts[..parts.len() - 1] {
        let n = number::parse_uint(part).map_err(|e| syntax(e.to_string(), file, line))?;
        current = dict
            .child_by_number(current, n)
            .ok_or_else(|| reference_err(format!("no such oid component '{part}'"), file, line))?;
    }
    let last = parts[parts.len() - 1];
    let n = number::parse_uint(last).map_err(|e| syntax(e.to_string(), file, line))?;
    Ok((current, n))
}

fn handle_attribute(
    fields: &[&str],
    file: &Path,
    line: usize,
    ctx: &mut LoadContext,
) -> Result<()> {
    require_arity(fields, 4, file, line)?;
    let name = fields[1];
    let oid_str = fields[2];
    let type_str = fields[3];
    let flags_str = fields.get(4).copied().unwrap_or("");

    if name.starts_with("Attr-") {
        return Err(syntax("attribute names may not begin with 'Attr-'", file, line));
    }

    let (attr_type, fixed_len) =
        types::parse_type_field(type_str).map_err(|e| type_flag_err(e, file, line))?;
    let (relative, parts) = number::split_oid(oid_str);

    let (parent, number, parent_is_struct) = {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
        let base = if relative {
            let base = ctx.relative_attr.ok_or_else(|| {
                context_err("no relative attribute in scope for '.' oid", file, line)
            })?;
            if dict.attr(base).attr_type != AttributeType::Tlv {
                return Err(context_err("relative oid base is not a tlv", file, line));
            }
            base
        } else {
            match ctx.stack.unwind() {
                Some(frame) => frame.attr.unwrap_or_else(|| dict.root()),
                None => dict.root(),
            }
        };
        let (parent, number) = resolve_oid_parent(dict, base, &parts, file, line)?;
        let parent_is_struct = dict.attr(parent).attr_type == AttributeType::Struct;
        (parent, number, parent_is_struct)
    };
    if parent_is_struct {
        return Err(context_err(
            "direct ATTRIBUTE children of a struct are not allowed; use MEMBER",
            file,
            line,
        ));
    }

    let mut parsed_flags =
        flags::parse_flags(flags_str, attr_type).map_err(|e| type_flag_err(e.to_string(), file, line))?;
    if let Some(n) = fixed_len {
        parsed_flags.flags.length = n;
    }
    if ctx.baseline_internal && !flags_str.contains("internal") {
        parsed_flags.flags.set_internal(true);
    }
    if !flags::flags_valid(attr_type, &parsed_flags.flags, parent_is_struct) {
        return Err(type_flag_err("flags not valid for this type/parent", file, line));
    }

    let id = {
        let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
        dict.add_attribute(parent, name, number, attr_type, parsed_flags.flags)
            .map_err(|(msg, _)| syntax(msg, file, line))?
    };

    if attr_type == AttributeType::Group {
        apply_group_ref(ctx, id, parsed_flags.group_ref, file, line)?;
    }

    if attr_type == AttributeType::Struct {
        ctx.stack
            .push(Frame::new(FrameTag::Auto, Some(id), name))
            .map_err(|_| stack_overflow(file, line))?;
    } else if attr_type == AttributeType::Tlv {
        ctx.relative_attr = Some(id);
    }

    Ok(())
}

fn apply_group_ref(
    ctx: &mut LoadContext,
    id: AttrId,
    group_ref: Option<String>,
    file: &Path,
    line: usize,
) -> Result<()> {
    let protocol_name = ctx
        .dict
        .as_ref()
        .ok_or_else(|| no_protocol_open(file, line))?
        .protocol_name
        .clone();
    match group_ref {
        None => {
            let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
            let root = dict.root();
            dict.attr(id).set_group_target(protocol_name, root);
            Ok(())
        }
        Some(reference) => {
            let found = {
                let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
                dict.by_name(&reference)
                    .map(|target| (target, dict.attr(target).attr_type))
            };
            match found {
                Some((target, target_type)) => {
                    if target_type != AttributeType::Tlv {
                        return Err(reference_err("group ref target is not a tlv", file, line));
                    }
                    let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
                    dict.attr(id).set_group_target(protocol_name, target);
                    Ok(())
                }
                None => {
                    ctx.fixups.push_group(GroupFixup {
                        file: file.to_path_buf(),
                        line,
                        attr: id,
                        reference,
                    });
                    Ok(())
                }
            }
        }
    }
}

fn handle_member(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 3, file, line)?;
    let name = fields[1];
    let type_str = fields[2];
    let flags_str = fields.get(3).copied().unwrap_or("");

    let (attr_type, fixed_len) =
        types::parse_type_field(type_str).map_err(|e| type_flag_err(e, file, line))?;
    if attr_type == AttributeType::Struct {
        return Err(type_flag_err(
            "nested struct via MEMBER is not supported; use STRUCT",
            file,
            line,
        ));
    }

    let (frame_tag, frame_attr, frame_sealed) = {
        let top = ctx
            .stack
            .top()
            .ok_or_else(|| context_err("MEMBER outside struct", file, line))?;
        (top.tag, top.attr, top.sealed)
    };
    if frame_tag != FrameTag::Auto {
        return Err(context_err("MEMBER outside struct", file, line));
    }
    let parent = frame_attr.ok_or_else(|| context_err("MEMBER outside struct", file, line))?;
    if frame_sealed {
        return Err(context_err(
            "struct already sealed by a trailing tlv member",
            file,
            line,
        ));
    }

    {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
        if !matches!(
            dict.attr(parent).attr_type,
            AttributeType::Struct | AttributeType::Tlv
        ) {
            return Err(context_err("MEMBER outside struct", file, line));
        }
    }

    let mut parsed_flags =
        flags::parse_flags(flags_str, attr_type).map_err(|e| type_flag_err(e.to_string(), file, line))?;
    if let Some(n) = fixed_len {
        parsed_flags.flags.length = n;
    }
    if !flags::flags_valid(attr_type, &parsed_flags.flags, true) {
        return Err(type_flag_err("flags not valid for this member", file, line));
    }

    let member_number = u64::from(ctx.stack.top().unwrap().member_count) + 1;

    let id = {
        let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
        let id = dict
            .add_attribute(parent, name, member_number, attr_type, parsed_flags.flags)
            .map_err(|(msg, _)| syntax(msg, file, line))?;
        let width = attr_type
            .fixed_size()
            .map(|n| n as u8)
            .unwrap_or(parsed_flags.flags.length);
        dict.attr(parent).add_length(width);
        id
    };

    {
        let is_fixed = attr_type.fixed_size().is_some()
            || (attr_type == AttributeType::Octets && fixed_len.is_some());
        let frame = ctx.stack.top_mut().unwrap();
        frame.member_count += 1;
        frame.last_member_fixed = is_fixed;
        if attr_type == AttributeType::Tlv {
            frame.sealed = true;
        }
    }

    if attr_type == AttributeType::Tlv {
        ctx.relative_attr = Some(id);
        ctx.stack
            .push(Frame::new(FrameTag::Auto, Some(id), name))
            .map_err(|_| stack_overflow(file, line))?;
    }

    Ok(())
}

fn handle_struct(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 4, file, line)?;
    let key_attr_name = fields[1];
    let name = fields[2];
    let value_str = fields[3];

    let (key_attr, key_parent, key_type) = {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
        let key_attr = dict.by_name(key_attr_name).ok_or_else(|| {
            reference_err(format!("no such attribute '{key_attr_name}'"), file, line)
        })?;
        if !dict.attr(key_attr).flags.extra() {
            return Err(type_flag_err("key attribute must carry the 'key' flag", file, line));
        }
        let key_parent = dict
            .attr(key_attr)
            .parent
            .ok_or_else(|| context_err("key attribute has no enclosing struct", file, line))?;
        if dict.attr(key_parent).attr_type != AttributeType::Struct {
            return Err(context_err("key attribute's parent is not a struct", file, line));
        }
        (key_attr, key_parent, dict.attr(key_attr).attr_type)
    };

    match ctx.stack.unwind_to_attr(key_parent) {
        Some(frame) if frame.last_member_fixed => {}
        Some(_) => {
            return Err(context_err(
                "preceding struct member must be fixed-size before a STRUCT sub-declaration",
                file,
                line,
            ));
        }
        None => return Err(context_err("STRUCT outside its key attribute's struct", file, line)),
    }

    let id = {
        let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
        let value = dict::parse_value(key_type, value_str).map_err(|e| syntax(e, file, line))?;
        let number = match &value {
            Value::Uint(n) => *n,
            _ => return Err(type_flag_err("STRUCT value must be an unsigned integer", file, line)),
        };
        // Parented under the key attribute itself (not the enclosing
        // struct): the discriminant value is the key attribute's own
        // numbering domain, distinct from the enclosing struct's sequential
        // member numbers, so `Request`/`Reply`-style sibling structs never
        // collide with `Code`/`Length`-style sibling members.
        let id = dict
            .add_attribute(key_attr, name, number, AttributeType::Struct, FlagSet::default())
            .map_err(|(msg, _)| syntax(msg, file, line))?;
        dict.add_enum(key_attr, name, value)
            .map_err(|(msg, _)| syntax(msg, file, line))?;
        id
    };

    ctx.stack
        .push(Frame::new(FrameTag::Auto, Some(id), name))
        .map_err(|_| stack_overflow(file, line))?;

    Ok(())
}

fn handle_value(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 4, file, line)?;
    let attr_name = fields[1];
    let alias = fields[2];
    let text = fields[3..].join(" ");

    let cached = ctx
        .value_cache
        .as_ref()
        .filter(|(name, _)| name.eq_ignore_ascii_case(attr_name))
        .map(|(_, id)| *id);

    let attr_id = match cached {
        Some(id) => id,
        None => {
            let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
            match dict.by_name(attr_name) {
                Some(id) => id,
                None => {
                    ctx.fixups.push_enum(EnumFixup {
                        file: file.to_path_buf(),
                        line,
                        attr_name: attr_name.to_string(),
                        alias: alias.to_string(),
                        raw_value: text,
                    });
                    return Ok(());
                }
            }
        }
    };
    ctx.value_cache = Some((attr_name.to_string(), attr_id));

    let attr_type = {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
        dict.attr(attr_id).attr_type
    };
    if !attr_type.admits_enum() {
        return Err(type_flag_err(
            format!("type {attr_type:?} does not admit VALUE enumerations"),
            file,
            line,
        ));
    }
    let value = dict::parse_value(attr_type, &text).map_err(|e| syntax(e, file, line))?;

    let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
    dict.add_enum(attr_id, alias, value)
        .map_err(|(msg, _)| syntax(msg, file, line))?;

    Ok(())
}

fn handle_flags(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let arg = fields[1];
    let (negate, key) = match arg.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, arg),
    };
    if key != "internal" {
        return Err(syntax(format!("unknown FLAGS key '{key}'"), file, line));
    }
    ctx.baseline_internal = !negate;
    Ok(())
}

fn handle_vendor(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 3, file, line)?;
    let name = fields[1];
    let number = number::parse_bounded(fields[2], u32::MAX as u64)
        .map_err(|e| syntax(e.to_string(), file, line))? as u32;

    let format = match fields.get(3).and_then(|f| f.strip_prefix("format=")) {
        Some(spec) => {
            number::parse_vendor_format(spec).map_err(|e| syntax(e.to_string(), file, line))?
        }
        None => number::VendorFormat::default(),
    };
    if format.continuation && number != 24757 {
        return Err(type_flag_err(
            "continuation flag ('c') is only legal for the WiMAX vendor (24757)",
            file,
            line,
        ));
    }

    {
        let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
        dict.add_vendor(Vendor {
            name: name.to_string(),
            number,
            format,
        })
        .map_err(|(msg, _)| reference_err(msg, file, line))?;
    }

    ctx.relative_attr = None;
    ctx.value_cache = None;
    Ok(())
}

fn handle_protocol(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 3, file, line)?;
    let name = fields[1];
    let number = number::parse_bounded(fields[2], 255)
        .map_err(|e| syntax(e.to_string(), file, line))? as u32;
    let type_size = match fields.get(3).and_then(|f| f.strip_prefix("format=")) {
        Some(spec) => {
            number::parse_bounded(spec, 4).map_err(|e| syntax(e.to_string(), file, line))? as u8
        }
        None => 1,
    };

    if ctx.dict.is_none() {
        ctx.dict = Some(Dictionary::new(name, number, type_size));
        return Ok(());
    }

    if !ctx.dict_is_internal {
        return Err(context_err(
            "PROTOCOL not allowed inside an open protocol block",
            file,
            line,
        ));
    }

    match ctx.pending.get(name) {
        Some(existing) => {
            if existing.protocol_number != number || existing.type_size != type_size {
                return Err(reference_err(
                    format!("protocol '{name}' redeclared with different number/format"),
                    file,
                    line,
                ));
            }
        }
        None => {
            ctx.pending
                .insert(name.to_string(), Dictionary::new(name, number, type_size));
        }
    }
    Ok(())
}

fn handle_begin_protocol(
    fields: &[&str],
    file: &Path,
    line: usize,
    ctx: &mut LoadContext,
) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let name = fields[1];
    if !ctx.dict_is_internal {
        return Err(context_err("BEGIN-PROTOCOL nesting is not allowed", file, line));
    }
    let pending = ctx
        .pending
        .remove(name)
        .ok_or_else(|| reference_err(format!("protocol '{name}' was not declared"), file, line))?;

    ctx.suspended = ctx.dict.take();
    ctx.dict = Some(pending);
    ctx.dict_is_internal = false;
    ctx.relative_attr = None;
    ctx.value_cache = None;
    ctx.stack
        .push(Frame::new(FrameTag::Protocol, None, name))
        .map_err(|_| stack_overflow(file, line))?;
    Ok(())
}

fn handle_end_protocol(
    fields: &[&str],
    file: &Path,
    line: usize,
    ctx: &mut LoadContext,
    loader: &Loader,
    protocols: &mut ProtocolTable,
) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let name = fields[1];
    close_frame(ctx, FrameTag::Protocol, "PROTOCOL", name, file, line)?;

    resolve_fixups(ctx, loader, protocols, file, line)?;

    let finished = ctx
        .dict
        .take()
        .ok_or_else(|| context_err("no protocol open to end", file, line))?;
    finished.warm_up();
    protocols.insert(Rc::new(finished));

    ctx.dict = ctx.suspended.take();
    ctx.dict_is_internal = true;
    ctx.relative_attr = None;
    ctx.value_cache = None;
    Ok(())
}

fn handle_begin_tlv(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let name = fields[1];
    let id = {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
        let id = dict
            .by_name(name)
            .ok_or_else(|| reference_err(format!("no such attribute '{name}'"), file, line))?;
        if dict.attr(id).attr_type != AttributeType::Tlv {
            return Err(type_flag_err(format!("'{name}' is not a tlv"), file, line));
        }
        // A BEGIN-TLV for an attribute outside the enclosing BEGIN-VENDOR's
        // subtree is allowed here; the mismatch surfaces at the closing
        // END-VENDOR/END-TLV instead, which can name the specific frame
        // that didn't match.
        if dict.is_under_vsa(id) {
            return Err(context_err(format!("'{name}' is under a vsa"), file, line));
        }
        id
    };
    ctx.relative_attr = Some(id);
    ctx.stack
        .push(Frame::new(FrameTag::Tlv, Some(id), name))
        .map_err(|_| stack_overflow(file, line))?;
    Ok(())
}

fn handle_end_tlv(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let name = fields[1];
    close_frame(ctx, FrameTag::Tlv, "TLV", name, file, line)?;
    Ok(())
}

fn handle_begin_vendor(
    fields: &[&str],
    file: &Path,
    line: usize,
    ctx: &mut LoadContext,
) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let name = fields[1];

    let vendor = {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
        dict.vendor_by_name(name)
            .cloned()
            .ok_or_else(|| reference_err(format!("no such vendor '{name}'"), file, line))?
    };

    let format_attr = fields.get(2).and_then(|f| f.strip_prefix("format="));
    let unwound_base: Option<AttrId> = if format_attr.is_none() {
        ctx.stack.unwind().and_then(|f| f.attr)
    } else {
        None
    };

    let anchor = match format_attr {
        Some(attr_name) => {
            let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
            let id = dict.by_name(attr_name).ok_or_else(|| {
                reference_err(format!("no such attribute '{attr_name}'"), file, line)
            })?;
            if dict.attr(id).attr_type != AttributeType::Vsa {
                return Err(type_flag_err(format!("'{attr_name}' is not a vsa"), file, line));
            }
            let parent_is_extended = dict
                .attr(id)
                .parent
                .is_some_and(|p| dict.attr(p).attr_type == AttributeType::ExtendedAttr);
            if !parent_is_extended {
                return Err(type_flag_err(
                    format!("'{attr_name}' is not a vsa under an extended attribute"),
                    file,
                    line,
                ));
            }
            id
        }
        None => {
            let existing = {
                let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(file, line))?;
                dict.by_name("Vendor-Specific")
            };
            match existing {
                Some(id) => id,
                None => {
                    let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
                    let base = unwound_base.unwrap_or_else(|| dict.root());
                    dict.add_attribute(base, "Vendor-Specific", 26, AttributeType::Vsa, FlagSet::default())
                        .map_err(|(msg, _)| syntax(msg, file, line))?
                }
            }
        }
    };

    let vendor_child = {
        let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(file, line))?;
        match dict.child_by_number(anchor, u64::from(vendor.number)) {
            Some(id) => id,
            None => dict
                .add_attribute(
                    anchor,
                    &vendor.name,
                    u64::from(vendor.number),
                    AttributeType::Vendor,
                    FlagSet::default(),
                )
                .map_err(|(msg, _)| syntax(msg, file, line))?,
        }
    };

    ctx.relative_attr = None;
    ctx.value_cache = None;
    ctx.stack
        .push(Frame::new(FrameTag::Vendor, Some(vendor_child), name))
        .map_err(|_| stack_overflow(file, line))?;
    Ok(())
}

fn handle_end_vendor(fields: &[&str], file: &Path, line: usize, ctx: &mut LoadContext) -> Result<()> {
    require_arity(fields, 2, file, line)?;
    let name = fields[1];
    close_frame(ctx, FrameTag::Vendor, "VENDOR", name, file, line)?;
    ctx.relative_attr = None;
    ctx.value_cache = None;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_include(
    target: &str,
    soft: bool,
    file: &Path,
    line: usize,
    ctx: &mut LoadContext,
    loader: &Loader,
    protocols: &mut ProtocolTable,
    include_depth: usize,
) -> Result<()> {
    if include_depth + 1 > loader.config().max_include_depth {
        return Err(resource_err("max $INCLUDE depth exceeded", file, line));
    }

    let target_path = Path::new(target);
    let resolved: PathBuf = if target_path.is_absolute() {
        target_path.to_path_buf()
    } else {
        file.parent().unwrap_or_else(|| Path::new(".")).join(target_path)
    };

    // An implicit struct auto frame may legitimately stay open across the
    // include boundary (see the module-level note on `named_depth`); only a
    // dangling explicit BEGIN-* is an error here.
    let named_depth_before = ctx.stack.named_depth();
    match process_file(&resolved, ctx, loader, protocols, include_depth + 1) {
        Ok(()) => {
            if ctx.stack.named_depth() != named_depth_before {
                return Err(context_err(
                    "included file left an unterminated BEGIN-* block open",
                    file,
                    line,
                ));
            }
            Ok(())
        }
        Err(e) if soft && matches!(e.kind, DictErrorKind::Io(_)) => {
            log::debug!("$INCLUDE- skipped missing file {}", resolved.display());
            Ok(())
        }
        Err(e) => Err(e.push_context(file, line)),
    }
}

/// Resolves every pending enum and group fixup against `ctx.dict`.
pub(crate) fn resolve_fixups(
    ctx: &mut LoadContext,
    loader: &Loader,
    protocols: &mut ProtocolTable,
    file: &Path,
    line: usize,
) -> Result<()> {
    let enums = std::mem::take(&mut ctx.fixups.enums);
    for fixup in enums {
        let dict = ctx.dict.as_mut().ok_or_else(|| no_protocol_open(&fixup.file, fixup.line))?;
        let attr_id = dict.by_name(&fixup.attr_name).ok_or_else(|| {
            reference_err(
                format!("VALUE references undeclared attribute '{}'", fixup.attr_name),
                &fixup.file,
                fixup.line,
            )
        })?;
        let attr_type = dict.attr(attr_id).attr_type;
        if !attr_type.admits_enum() {
            return Err(type_flag_err(
                format!("type {attr_type:?} does not admit VALUE enumerations"),
                &fixup.file,
                fixup.line,
            ));
        }
        let value = dict::parse_value(attr_type, &fixup.raw_value)
            .map_err(|e| syntax(e, &fixup.file, fixup.line))?;
        dict.add_enum(attr_id, &fixup.alias, value)
            .map_err(|(msg, _)| syntax(msg, &fixup.file, fixup.line))?;
    }

    let groups = std::mem::take(&mut ctx.fixups.groups);
    for fixup in groups {
        resolve_group_fixup(ctx, loader, protocols, &fixup)?;
    }

    let _ = (file, line);
    Ok(())
}

fn resolve_group_fixup(
    ctx: &mut LoadContext,
    loader: &Loader,
    protocols: &mut ProtocolTable,
    fixup: &GroupFixup,
) -> Result<()> {
    {
        let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(&fixup.file, fixup.line))?;
        if let Some(target) = dict.by_name(&fixup.reference) {
            if dict.attr(target).attr_type != AttributeType::Tlv {
                return Err(reference_err("group ref target is not a tlv", &fixup.file, fixup.line));
            }
            let protocol_name = dict.protocol_name.clone();
            dict.attr(fixup.attr).set_group_target(protocol_name, target);
            return Ok(());
        }
    }

    let (proto_name, suffix) = match fixup.reference.split_once('.') {
        Some((p, s)) => (p, s),
        None => {
            return Err(reference_err(
                format!("unresolved group ref '{}'", fixup.reference),
                &fixup.file,
                fixup.line,
            ))
        }
    };

    let target_dict = match protocols.get(proto_name) {
        Some(d) => d,
        None => loader
            .load_protocol_with(protocols, proto_name)
            .map_err(|e| e.push_context(&fixup.file, fixup.line))?,
    };

    let target_id = if suffix.is_empty() {
        target_dict.root()
    } else {
        target_dict.by_name(suffix).ok_or_else(|| {
            reference_err(
                format!("no such attribute '{suffix}' in protocol '{proto_name}'"),
                &fixup.file,
                fixup.line,
            )
        })?
    };
    if target_dict.attr(target_id).attr_type != AttributeType::Tlv {
        return Err(reference_err("group ref target is not a tlv", &fixup.file, fixup.line));
    }

    let dict = ctx.dict.as_ref().ok_or_else(|| no_protocol_open(&fixup.file, fixup.line))?;
    dict.attr(fixup.attr)
        .set_group_target(proto_name.to_string(), target_id);
    Ok(())
}
