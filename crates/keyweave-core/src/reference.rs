#![forbid(unsafe_code)]

//! Classification of template references.
//!
//! Event handler arguments may name values that do not live in the data
//! model at all: the triggering event (`event`, `event.node.id`) or the
//! arguments passed along with it (`arguments.0`, or the 1-based shorthand
//! `$1`, `$2.name`; `$0` names no argument and reads as undefined). These
//! are recognised before context resolution and
//! carried as a [`SpecialRef`]; every other reference is a plain keypath
//! reference handed to [`resolve_reference`](crate::resolve::resolve_reference).

use crate::keypath::{SEPARATOR, is_index};
use crate::value::Value;

/// Source a special reference reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialSource {
    /// The event object.
    Event,
    /// The argument list; the first key is the 0-based index.
    Arguments,
}

/// A reference into the event or its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialRef {
    pub source: SpecialSource,
    pub keys: Vec<String>,
}

impl SpecialRef {
    /// Walk `keys` through the event or the argument list.
    ///
    /// Missing keys yield [`Value::Undefined`].
    #[must_use]
    pub fn read(&self, event: &Value, arguments: &[Value]) -> Value {
        let found = match self.source {
            SpecialSource::Event => event.get_segments(&self.keys),
            SpecialSource::Arguments => {
                let Some((first, rest)) = self.keys.split_first() else {
                    return Value::array(arguments.to_vec());
                };
                first
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| arguments.get(i))
                    .and_then(|arg| arg.get_segments(rest))
            }
        };
        found.cloned().unwrap_or_default()
    }
}

/// A classified reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    Special(SpecialRef),
    Plain(&'a str),
}

impl<'a> Reference<'a> {
    /// Classify `reference`.
    #[must_use]
    pub fn parse(reference: &'a str) -> Self {
        let (head, tail) = match reference.find(SEPARATOR) {
            Some(idx) => (&reference[..idx], Some(&reference[idx + 1..])),
            None => (reference, None),
        };
        // `event.` and `$1.` are not special: the tail must be non-empty.
        let tail_keys = match tail {
            Some("") => return Self::Plain(reference),
            Some(rest) => rest.split(SEPARATOR).map(str::to_owned).collect(),
            None => Vec::new(),
        };

        let special = match head {
            "event" => SpecialRef {
                source: SpecialSource::Event,
                keys: tail_keys,
            },
            "arguments" => SpecialRef {
                source: SpecialSource::Arguments,
                keys: tail_keys,
            },
            _ => {
                let Some(digits) = head.strip_prefix('$').filter(|d| is_index(d)) else {
                    return Self::Plain(reference);
                };
                // `$0` maps to index -1, which no argument list holds.
                let index = match digits.parse::<usize>() {
                    Ok(position) if position > 0 => (position - 1).to_string(),
                    _ => String::from("-1"),
                };
                let mut keys = Vec::with_capacity(tail_keys.len() + 1);
                keys.push(index);
                keys.extend(tail_keys);
                SpecialRef {
                    source: SpecialSource::Arguments,
                    keys,
                }
            }
        };
        Self::Special(special)
    }
}
