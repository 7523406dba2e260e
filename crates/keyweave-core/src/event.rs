#![forbid(unsafe_code)]

//! Validated event names for event directives.
//!
//! Element events map onto concrete DOM event names and must be literal.
//! Component proxy-events may use `*` as a per-segment wildcard
//! (`*.select`, `tab.*`), matched against dotted event names when the
//! component fires.

use crate::error::{Error, Result};
use crate::keypath::SEPARATOR;

/// Wildcard marker.
pub const WILDCARD: char = '*';

/// What the directive is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Element,
    Component,
}

/// An event name checked against the rules of its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventName {
    name: String,
    target: EventTarget,
}

impl EventName {
    /// Validate an event name for an element named `owner`.
    ///
    /// # Errors
    ///
    /// [`Error::WildcardEventName`] when `name` contains `*`.
    pub fn for_element(owner: &str, name: &str) -> Result<Self> {
        if name.contains(WILDCARD) {
            return Err(Error::wildcard(owner, name));
        }
        Ok(Self {
            name: name.to_owned(),
            target: EventTarget::Element,
        })
    }

    /// A component proxy-event name. Wildcards are allowed.
    #[must_use]
    pub fn for_component(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            target: EventTarget::Component,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn target(&self) -> EventTarget {
        self.target
    }

    /// Whether any segment is a wildcard.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        self.name.contains(WILDCARD)
    }

    /// Whether a fired event name matches this name.
    ///
    /// Segment counts must agree; a `*` segment matches any single segment.
    #[must_use]
    pub fn matches(&self, fired: &str) -> bool {
        if !self.is_pattern() {
            return self.name == fired;
        }
        let mut pattern = self.name.split(SEPARATOR);
        let mut actual = fired.split(SEPARATOR);
        loop {
            match (pattern.next(), actual.next()) {
                (None, None) => return true,
                (Some(p), Some(a)) if p == "*" || p == a => {}
                _ => return false,
            }
        }
    }
}
