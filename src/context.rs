//! The parser's push-down context stack.

use crate::dict::AttrId;

/// Maximum nesting depth of the context stack (protocol/vendor/TLV/struct).
pub const MAX_DEPTH: usize = 32;

/// What kind of directive opened a stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Protocol,
    Vendor,
    Tlv,
    /// Pushed implicitly by a `struct`-typed `ATTRIBUTE`/`MEMBER`/`STRUCT`
    /// line; popped implicitly whenever the next named frame closes.
    Auto,
}

/// One entry of the context stack.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: FrameTag,
    /// The attribute this frame is attached to (the TLV/struct/vendor
    /// being extended). `None` only for the implicit top-level protocol
    /// frame, where "attention" tracking is handled by `relative_attr`
    /// instead.
    pub attr: Option<AttrId>,
    pub name: String,
    /// Running member counter, used only by struct frames.
    pub member_count: u32,
    /// Set once this struct frame has accepted a trailing `tlv` member;
    /// any further `MEMBER` line under it is then a context error.
    pub sealed: bool,
    /// Whether the most recently added `MEMBER` of this struct frame has a
    /// fixed wire width (a fixed-size type, or `octets[N]`). Consulted by
    /// `STRUCT`, which may only sub-declare immediately after such a
    /// member.
    pub last_member_fixed: bool,
}

impl Frame {
    #[must_use]
    pub fn new(tag: FrameTag, attr: Option<AttrId>, name: impl Into<String>) -> Self {
        Self {
            tag,
            attr,
            name: name.into(),
            member_count: 0,
            sealed: false,
            last_member_fixed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    Overflow,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "context stack depth exceeds {MAX_DEPTH}")
    }
}

impl std::error::Error for Error {}

/// The push-down stack of open `BEGIN-*`/implicit-struct frames.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    #[must_use]
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Count of frames opened by an explicit `BEGIN-*` directive, ignoring
    /// implicit `Auto` struct frames.
    ///
    /// There is no `END-STRUCT` directive: a struct (or `STRUCT`
    /// sub-declaration) frame has nothing that closes it explicitly, and
    /// per the source behavior this crate preserves, it may legitimately
    /// remain open at end-of-file or across an `$INCLUDE` boundary. Only a
    /// dangling `BEGIN-PROTOCOL`/`BEGIN-TLV`/`BEGIN-VENDOR` without its
    /// matching `END-*` is a genuine "unterminated block" error.
    #[must_use]
    pub fn named_depth(&self) -> usize {
        self.frames.iter().filter(|f| f.tag != FrameTag::Auto).count()
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), Error> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(Error::Overflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    #[must_use]
    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    #[must_use]
    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Pops frames tagged `Auto` until a named frame is on top (or the
    /// stack is empty), returning that named frame if any.
    pub fn unwind(&mut self) -> Option<&Frame> {
        while matches!(self.frames.last(), Some(f) if f.tag == FrameTag::Auto) {
            self.frames.pop();
        }
        self.frames.last()
    }

    /// Pops `Auto` frames until the frame attached to `target` is on top,
    /// or bails with `None` if a non-`Auto` frame is reached first without
    /// matching.
    ///
    /// Plain [`unwind`](Self::unwind) stops at the first non-`Auto` frame,
    /// which is wrong for `STRUCT`: a struct's own frame is itself tagged
    /// `Auto`, and a sibling `STRUCT` sub-declaration may have pushed a
    /// further `Auto` frame of its own (for its `MEMBER` lines) on top of
    /// it. This walks back to the specific struct frame instead of the
    /// first non-`Auto` ancestor.
    pub fn unwind_to_attr(&mut self, target: AttrId) -> Option<&Frame> {
        loop {
            match self.frames.last() {
                Some(f) if f.attr == Some(target) => return self.frames.last(),
                Some(f) if f.tag == FrameTag::Auto => {
                    self.frames.pop();
                }
                _ => return None,
            }
        }
    }

    /// Pops auto frames then the next frame, verifying it is tagged `tag`
    /// and named `name` (case-insensitively). Returns the mismatched frame
    /// as `Err` if the next named frame doesn't match.
    pub fn close(&mut self, tag: FrameTag, name: &str) -> Result<Frame, Option<Frame>> {
        while matches!(self.frames.last(), Some(f) if f.tag == FrameTag::Auto) {
            self.frames.pop();
        }
        match self.frames.pop() {
            Some(f) if f.tag == tag && f.name.eq_ignore_ascii_case(name) => Ok(f),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_depth_limit() {
        let mut stack = ContextStack::new();
        for i in 0..MAX_DEPTH {
            stack
                .push(Frame::new(FrameTag::Auto, None, format!("f{i}")))
                .unwrap();
        }
        assert!(stack.push(Frame::new(FrameTag::Auto, None, "overflow")).is_err());
    }

    #[test]
    fn unwind_skips_auto_frames() {
        let mut stack = ContextStack::new();
        stack.push(Frame::new(FrameTag::Protocol, None, "radius")).unwrap();
        stack.push(Frame::new(FrameTag::Auto, None, "s1")).unwrap();
        stack.push(Frame::new(FrameTag::Auto, None, "s2")).unwrap();
        let top = stack.unwind().unwrap();
        assert_eq!(top.tag, FrameTag::Protocol);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn unwind_to_attr_walks_past_nested_auto_frames() {
        let mut stack = ContextStack::new();
        let packet = AttrId(1);
        let request = AttrId(2);
        stack
            .push(Frame::new(FrameTag::Auto, Some(packet), "Packet"))
            .unwrap();
        stack
            .push(Frame::new(FrameTag::Auto, Some(request), "Request"))
            .unwrap();
        let top = stack.unwind_to_attr(packet).unwrap();
        assert_eq!(top.name, "Packet");
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn unwind_to_attr_matches_frame_already_on_top() {
        let mut stack = ContextStack::new();
        let packet = AttrId(1);
        stack
            .push(Frame::new(FrameTag::Auto, Some(packet), "Packet"))
            .unwrap();
        assert!(stack.unwind_to_attr(packet).is_some());
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn unwind_to_attr_bails_on_non_auto_mismatch() {
        let mut stack = ContextStack::new();
        stack.push(Frame::new(FrameTag::Tlv, Some(AttrId(9)), "Foo")).unwrap();
        assert!(stack.unwind_to_attr(AttrId(1)).is_none());
    }

    #[test]
    fn close_matches_named_frame() {
        let mut stack = ContextStack::new();
        stack.push(Frame::new(FrameTag::Tlv, None, "Foo")).unwrap();
        stack.push(Frame::new(FrameTag::Auto, None, "inner")).unwrap();
        let closed = stack.close(FrameTag::Tlv, "foo").unwrap();
        assert_eq!(closed.name, "Foo");
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn close_reports_mismatch() {
        let mut stack = ContextStack::new();
        stack.push(Frame::new(FrameTag::Tlv, None, "Foo")).unwrap();
        let err = stack.close(FrameTag::Tlv, "Bar").unwrap_err();
        assert_eq!(err.unwrap().name, "Foo");
    }
}
