#![forbid(unsafe_code)]

//! The read capability the resolver needs from a data model.

use crate::keypath::Keypath;
use crate::value::Value;

/// Read access to a keypath-addressed model.
///
/// Reference resolution is generic over this trait so that it can run
/// against a bare [`Value`] tree or against a store that layers caches and
/// computed values on top of one.
pub trait Gettable {
    /// Whether the value at `keypath` is an object or array that owns `key`
    /// as a direct property.
    fn owns_key(&self, keypath: &Keypath, key: &str) -> bool;

    /// Whether `keypath` currently holds a defined value.
    fn is_defined(&self, keypath: &Keypath) -> bool;
}

impl Gettable for Value {
    fn owns_key(&self, keypath: &Keypath, key: &str) -> bool {
        self.get_path(keypath).is_some_and(|v| v.owns_key(key))
    }

    fn is_defined(&self, keypath: &Keypath) -> bool {
        self.get_path(keypath).is_some_and(Value::is_defined)
    }
}

impl<T: Gettable + ?Sized> Gettable for &T {
    fn owns_key(&self, keypath: &Keypath, key: &str) -> bool {
        (**self).owns_key(keypath, key)
    }

    fn is_defined(&self, keypath: &Keypath) -> bool {
        (**self).is_defined(keypath)
    }
}
