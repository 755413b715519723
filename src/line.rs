//! Splits a raw dictionary source line into whitespace-separated fields.

/// Maximum number of fields a single line may split into.
pub const MAX_FIELDS: usize = 16;

/// A line split into its fields, borrowed from the original buffer.
///
/// Comment text (anything from an unescaped `#` to end of line) is excluded;
/// the returned fields never include it.
#[derive(Debug, Clone, Default)]
pub struct Fields<'a> {
    fields: [&'a str; MAX_FIELDS],
    len: usize,
}

impl<'a> Fields<'a> {
    #[must_use]
    pub fn as_slice(&self) -> &[&'a str] {
        &self.fields[..self.len]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<&'a str> {
        self.fields.get(i).copied()
    }
}

/// Strips a trailing comment, then splits the remainder on ASCII whitespace.
///
/// Overflowing `MAX_FIELDS` silently drops trailing fields; the engine
/// rejects any directive whose required arity exceeds what it finds, so a
/// too-long line ends up reported as a syntax error at the call site rather
/// than here.
#[must_use]
pub fn tokenize(line: &str) -> Fields<'_> {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };

    let mut fields: [&str; MAX_FIELDS] = [""; MAX_FIELDS];
    let mut len = 0;
    for word in line.split_ascii_whitespace() {
        if len == MAX_FIELDS {
            break;
        }
        fields[len] = word;
        len += 1;
    }
    Fields { fields, len }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        let f = tokenize("ATTRIBUTE\tFoo-Bar  1  integer");
        assert_eq!(f.as_slice(), &["ATTRIBUTE", "Foo-Bar", "1", "integer"]);
    }

    #[test]
    fn strips_comment() {
        let f = tokenize("ATTRIBUTE Foo 1 integer # trailing note");
        assert_eq!(f.as_slice(), &["ATTRIBUTE", "Foo", "1", "integer"]);
    }

    #[test]
    fn comment_only_line_is_empty() {
        let f = tokenize("   # just a comment");
        assert!(f.is_empty());
    }

    #[test]
    fn blank_line_is_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t  ").is_empty());
    }

    #[test]
    fn overflow_truncates_fields() {
        let many: String = (0..20).map(|i| format!("f{i} ")).collect();
        let f = tokenize(&many);
        assert_eq!(f.len(), MAX_FIELDS);
    }
}
