#![forbid(unsafe_code)]

//! JSON-like value trees addressed by [`Keypath`].
//!
//! [`Value`] is the data model the dependency graph observes. It mirrors a
//! JSON document with one addition: [`Value::Undefined`], the result of
//! reading a keypath that does not exist.
//!
//! Arrays carry a stable [`ArrayId`]. Cloning an array keeps its identity,
//! so the same logical array written at two keypaths can be tracked as one
//! object by the runtime's array-mutation tracking.
//!
//! # Invariants
//!
//! 1. Reading through a missing or primitive intermediate yields `None`,
//!    never a panic.
//! 2. Writing creates missing intermediate containers: an index segment
//!    creates an array, any other segment creates an object.
//! 3. Equality compares contents only; array identity is ignored.
//! 4. A write that cannot land leaves the tree untouched. An index segment
//!    may extend an array by at most [`MAX_INDEX_GAP`] slots.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::keypath::{Keypath, is_index};

/// Object storage. Key order follows insertion order.
pub type Object = IndexMap<String, Value>;

/// How far past the end of an array a write may address.
pub const MAX_INDEX_GAP: usize = 1 << 16;

static NEXT_ARRAY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an array value, shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(u64);

impl ArrayId {
    fn next() -> Self {
        Self(NEXT_ARRAY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// An array with a stable identity.
#[derive(Debug, Clone)]
pub struct Array {
    id: ArrayId,
    items: Vec<Value>,
}

impl Array {
    /// Create a new array with a fresh identity.
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            id: ArrayId::next(),
            items,
        }
    }

    /// Identity shared by every clone of this array.
    #[must_use]
    pub const fn id(&self) -> ArrayId {
        self.id
    }

    /// Items.
    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Mutable access to the items. Identity is unaffected.
    pub fn items_mut(&mut self) -> &mut Vec<Value> {
        &mut self.items
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the array has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A node in the data model.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absent value.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Array),
    Object(Object),
}

impl Value {
    /// Empty object.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(Object::new())
    }

    /// Array with a fresh identity.
    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Array::new(items))
    }

    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub const fn is_defined(&self) -> bool {
        !self.is_undefined()
    }

    /// Whether this value can own keys (object or array).
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Direct property `key`. Arrays accept index keys only.
    #[must_use]
    pub fn get_key(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Array(array) if is_index(key) => {
                key.parse::<usize>().ok().and_then(|i| array.get(i))
            }
            _ => None,
        }
    }

    /// Whether this value is a container owning `key` as a direct property.
    ///
    /// An object entry holding [`Value::Undefined`] still counts as owned.
    #[must_use]
    pub fn owns_key(&self, key: &str) -> bool {
        self.get_key(key).is_some()
    }

    /// Value at `keypath` relative to this value.
    #[must_use]
    pub fn get_path(&self, keypath: &Keypath) -> Option<&Value> {
        if keypath.is_root() {
            return Some(self);
        }
        keypath
            .segments()
            .try_fold(self, |current, segment| current.get_key(segment))
    }

    /// Value at the given segments relative to this value.
    #[must_use]
    pub fn get_segments<S: AsRef<str>>(&self, segments: &[S]) -> Option<&Value> {
        segments
            .iter()
            .try_fold(self, |current, segment| current.get_key(segment.as_ref()))
    }

    /// Write `value` at `keypath`, creating missing intermediates.
    ///
    /// Returns `false` when a non-index segment addresses an array, which
    /// cannot hold named properties, or when an index lies more than
    /// [`MAX_INDEX_GAP`] slots past the array's end. The tree is left
    /// untouched in both cases.
    pub fn set_path(&mut self, keypath: &Keypath, value: Value) -> bool {
        if keypath.is_root() {
            *self = value;
            return true;
        }
        let segments: Vec<&str> = keypath.segments().collect();
        self.set_segments(&segments, value)
    }

    /// Write `value` at the given segments, creating missing intermediates.
    pub fn set_segments<S: AsRef<str>>(&mut self, segments: &[S], value: Value) -> bool {
        if !self.can_write(segments) {
            return false;
        }
        let mut target = self;
        for segment in segments {
            match slot_mut(target, segment.as_ref()) {
                Some(slot) => target = slot,
                None => return false,
            }
        }
        *target = value;
        true
    }

    fn can_write<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        let mut current = Some(self);
        for segment in segments {
            let key = segment.as_ref();
            let fits = match current {
                Some(Self::Array(array)) => index_slot(key, array.len()).is_some(),
                Some(Self::Object(_)) => true,
                // Missing or primitive: replaced by a fresh container.
                _ => !is_index(key) || index_slot(key, 0).is_some(),
            };
            if !fits {
                return false;
            }
            current = current.and_then(|v| v.get_key(key));
        }
        true
    }

    /// Convert to a `serde_json::Value`. `Undefined` and non-finite numbers
    /// become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(a) => {
                serde_json::Value::Array(a.items.iter().map(Value::to_json).collect())
            }
            Self::Object(o) => serde_json::Value::Object(
                o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn slot_mut<'a>(target: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    if !target.is_container() {
        *target = if is_index(key) {
            Value::Array(Array::default())
        } else {
            Value::object()
        };
    }
    match target {
        Value::Object(map) => Some(map.entry(key.to_owned()).or_default()),
        Value::Array(array) => {
            let index = index_slot(key, array.items.len())?;
            if index >= array.items.len() {
                array.items.resize(index.checked_add(1)?, Value::Undefined);
            }
            array.items.get_mut(index)
        }
        _ => None,
    }
}

fn index_slot(key: &str, len: usize) -> Option<usize> {
    if !is_index(key) {
        return None;
    }
    let index = key.parse::<usize>().ok()?;
    (index <= len.saturating_add(MAX_INDEX_GAP)).then_some(index)
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::array(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Self::Array(value)
    }
}
