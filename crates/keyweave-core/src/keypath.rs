#![forbid(unsafe_code)]

//! Dot-separated keypaths into the data model.
//!
//! A [`Keypath`] is an immutable, cheaply cloneable address such as
//! `user.name` or `items.3.label`. Each segment is a property name or an
//! array index written as text.
//!
//! # Invariants
//!
//! 1. Splitting a keypath into segments and rejoining them reproduces the
//!    original string exactly.
//! 2. The empty keypath is the root. It is an ancestor of every other
//!    keypath and has no parent.
//! 3. `a` is an ancestor of `b` iff `a` is a strict dot-prefix of `b`
//!    (`user` is an ancestor of `user.name`, but not of `username`).

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Segment separator.
pub const SEPARATOR: char = '.';

/// The implicit-iterator reference (`{{.}}`), resolved to the innermost
/// context.
pub const IMPLICIT_ITERATOR: &str = ".";

/// An absolute, dot-separated address into the data model.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keypath(Arc<str>);

impl Keypath {
    /// Create a keypath from its textual form.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    /// The root keypath (empty string).
    #[must_use]
    pub fn root() -> Self {
        Self(Arc::from(""))
    }

    /// Join segments with the separator.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = String::new();
        for (i, segment) in segments.into_iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(segment.as_ref());
        }
        Self::new(out)
    }

    /// Whether this is the root keypath.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over segments.
    ///
    /// The root keypath yields a single empty segment so that
    /// `from_segments(segments())` is lossless for every keypath.
    pub fn segments(&self) -> std::str::Split<'_, char> {
        self.0.split(SEPARATOR)
    }

    /// Number of segments below the root. The root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches(SEPARATOR).count() + 1
        }
    }

    /// Last segment (the key this keypath addresses within its parent).
    #[must_use]
    pub fn last_segment(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Direct parent. Top-level keypaths have the root as parent; the root
    /// has none.
    #[must_use]
    pub fn parent(&self) -> Option<Keypath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind(SEPARATOR) {
            Some(idx) => Self::new(&self.0[..idx]),
            None => Self::root(),
        })
    }

    /// Iterate over strict ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Keypath> {
        std::iter::successors(self.parent(), Keypath::parent)
    }

    /// Append a single key (or a dotted relative path).
    ///
    /// Joining an empty key returns `self` unchanged.
    #[must_use]
    pub fn join(&self, key: &str) -> Keypath {
        if key.is_empty() {
            self.clone()
        } else if self.is_root() {
            Self::new(key)
        } else {
            Self::new(format!("{}{SEPARATOR}{key}", self.0))
        }
    }

    /// Append every segment of `other`.
    #[must_use]
    pub fn concat(&self, other: &Keypath) -> Keypath {
        self.join(other.as_str())
    }

    /// Whether `self` is a strict dot-prefix of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Keypath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&*self.0)
            && other.0.as_bytes()[self.0.len()] == SEPARATOR as u8
    }

    /// Whether `other` is exactly one segment below `self`.
    #[must_use]
    pub fn is_parent_of(&self, other: &Keypath) -> bool {
        other.parent().as_ref() == Some(self)
    }

    /// Segments of `other` below `self`, if `self` is `other` or one of its
    /// ancestors.
    #[must_use]
    pub fn relative_segments<'a>(&self, other: &'a Keypath) -> Option<Vec<&'a str>> {
        if self == other {
            return Some(Vec::new());
        }
        if !self.is_ancestor_of(other) {
            return None;
        }
        let rest = if self.is_root() {
            other.as_str()
        } else {
            &other.as_str()[self.0.len() + 1..]
        };
        Some(rest.split(SEPARATOR).collect())
    }
}

impl Default for Keypath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keypath").field(&&*self.0).finish()
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Keypath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Keypath {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Keypath> for Keypath {
    fn from(value: &Keypath) -> Self {
        value.clone()
    }
}

impl AsRef<str> for Keypath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Keypath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Whether a segment is an array index.
#[must_use]
pub fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
