//! Deferred-reference bookkeeping: enum values and group refs seen before
//! their target attribute existed.

use std::path::PathBuf;

use crate::dict::AttrId;

/// A `VALUE` line whose attribute was not yet declared when it was read.
#[derive(Debug, Clone)]
pub struct EnumFixup {
    pub file: PathBuf,
    pub line: usize,
    pub attr_name: String,
    pub alias: String,
    pub raw_value: String,
}

/// A `ref=` clause on a `group` attribute that could not be resolved
/// immediately (forward reference within the same dictionary, or a
/// reference into a protocol not yet loaded).
#[derive(Debug, Clone)]
pub struct GroupFixup {
    pub file: PathBuf,
    pub line: usize,
    pub attr: AttrId,
    pub reference: String,
}

/// Scratch storage for one protocol's in-flight fixups.
///
/// Append-only; drained by the resolver when the enclosing protocol block
/// closes, then dropped with the `LoadContext` that owns it. There is no
/// shared arena allocator here — Rust's ownership model already gives the
/// "one drop frees everything" property the original's pool allocator
/// existed to provide.
#[derive(Debug, Default)]
pub struct FixupPool {
    pub enums: Vec<EnumFixup>,
    pub groups: Vec<GroupFixup>,
}

impl FixupPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_enum(&mut self, fixup: EnumFixup) {
        self.enums.push(fixup);
    }

    pub fn push_group(&mut self, fixup: GroupFixup) {
        self.groups.push(fixup);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enums.is_empty() && self.groups.is_empty()
    }
}
