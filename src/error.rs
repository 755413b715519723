//! Error taxonomy for the dictionary loader, with bottom-up diagnostics.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One failure from tokenizing, parsing, or resolving a dictionary.
///
/// Every variant carries the `file`/`line` of the offending source line.
/// `trace` accumulates additional `file[line]:` context as the error
/// propagates out through nested `$INCLUDE`s and secondary protocol loads,
/// giving a bottom-up diagnostic without relying on any thread-local state.
#[derive(Debug)]
pub struct DictError {
    pub kind: DictErrorKind,
    pub file: PathBuf,
    pub line: usize,
    pub trace: Vec<String>,
}

impl DictError {
    #[must_use]
    pub fn new(kind: DictErrorKind, file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            kind,
            file: file.into(),
            line,
            trace: Vec::new(),
        }
    }

    /// Appends a `file[line]:` frame recording where this error was observed
    /// while unwinding (e.g. the `$INCLUDE` line that triggered the failing
    /// nested load).
    #[must_use]
    pub fn push_context(mut self, file: impl Into<PathBuf>, line: usize) -> Self {
        self.trace.push(format!("{}[{}]", file.into().display(), line));
        self
    }
}

impl std::error::Error for DictError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.file.display(), self.line, self.kind)?;
        for frame in &self.trace {
            write!(f, "\n  included from {frame}")?;
        }
        Ok(())
    }
}

/// The seven error kinds the loader can raise.
#[derive(Debug, Error)]
pub enum DictErrorKind {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("type/flag error: {0}")]
    TypeFlag(String),

    #[error("context error: {0}")]
    Context(String),

    #[error("reference error: {0}")]
    Reference(String),

    #[error("security error: {0}")]
    Security(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("resource limit exceeded: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, DictError>;
