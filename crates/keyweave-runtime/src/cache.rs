#![forbid(unsafe_code)]

//! Value cache and the parent → child keypath index.
//!
//! The cache remembers the last value read at each keypath. The child index
//! records, for every keypath, the direct child keypaths that have been
//! touched (read or observed). Invalidation walks the index so that
//! clearing `user` also clears `user.name` and `user.address.city`.
//!
//! # Invariants
//!
//! 1. `children[P]` only ever holds keypaths exactly one segment below `P`.
//! 2. A keypath linked into the index has its whole ancestor chain linked,
//!    up to the root.
//! 3. The index is never pruned; stale children are tolerated and cost only
//!    an empty visit during a cascade.

use ahash::AHashMap;
use indexmap::IndexSet;
use keyweave_core::{Keypath, Value};
use tracing::trace;

use crate::arrays::ArrayTracker;

#[derive(Debug, Default)]
pub struct ValueCache {
    values: AHashMap<Keypath, Value>,
    children: AHashMap<Keypath, IndexSet<Keypath>>,
}

impl ValueCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, keypath: &Keypath) -> Option<&Value> {
        self.values.get(keypath)
    }

    #[must_use]
    pub fn contains(&self, keypath: &Keypath) -> bool {
        self.values.contains_key(keypath)
    }

    /// Cache `value` at `keypath` and link it into the child index.
    pub fn insert(&mut self, keypath: Keypath, value: Value) {
        self.link(&keypath);
        self.values.insert(keypath, value);
    }

    /// Drop the entry at `keypath` only, without cascading.
    pub fn remove(&mut self, keypath: &Keypath) -> Option<Value> {
        self.values.remove(keypath)
    }

    /// Link `keypath` and its ancestors into the child index.
    pub fn link(&mut self, keypath: &Keypath) {
        let mut child = keypath.clone();
        while let Some(parent) = child.parent() {
            let inserted = self.children.entry(parent.clone()).or_default().insert(child);
            if !inserted {
                break;
            }
            child = parent;
        }
    }

    /// Direct children of `keypath` known to the index.
    #[must_use]
    pub fn children(&self, keypath: &Keypath) -> Vec<Keypath> {
        self.children
            .get(keypath)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Clear `keypath` and every descendant reachable through the index.
    ///
    /// With `arrays` supplied, every cleared keypath also releases the
    /// array bound to it, unless that array is mid-mutation. This does not
    /// depend on the keypath still being cached. Returns the number of cache
    /// entries removed.
    pub fn invalidate(
        &mut self,
        keypath: &Keypath,
        mut arrays: Option<&mut ArrayTracker>,
    ) -> usize {
        let mut removed = 0;
        let mut stack = vec![keypath.clone()];
        while let Some(current) = stack.pop() {
            if let Some(tracker) = arrays.as_deref_mut()
                && let Some(array) = tracker.release(&current)
            {
                trace!(keypath = %current, array = array.raw(), "array detached");
            }
            if self.values.remove(&current).is_some() {
                removed += 1;
                trace!(keypath = %current, "cache entry cleared");
            }
            if let Some(children) = self.children.get(&current) {
                stack.extend(children.iter().cloned());
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyweave_core::Array;

    fn kp(s: &str) -> Keypath {
        Keypath::new(s)
    }

    #[test]
    fn insert_links_ancestor_chain() {
        let mut cache = ValueCache::new();
        cache.insert(kp("a.b.c"), Value::from(1));
        assert_eq!(cache.children(&Keypath::root()), vec![kp("a")]);
        assert_eq!(cache.children(&kp("a")), vec![kp("a.b")]);
        assert_eq!(cache.children(&kp("a.b")), vec![kp("a.b.c")]);
        assert!(!cache.contains(&kp("a.b")));
    }

    #[test]
    fn children_are_direct_only() {
        let mut cache = ValueCache::new();
        cache.link(&kp("a.b.c"));
        cache.link(&kp("a.d"));
        for parent in ["", "a", "a.b"] {
            let parent = kp(parent);
            for child in cache.children(&parent) {
                assert!(parent.is_parent_of(&child), "{parent} -> {child}");
            }
        }
        assert_eq!(cache.children(&kp("a")), vec![kp("a.b"), kp("a.d")]);
    }

    #[test]
    fn invalidate_cascades_through_descendants() {
        let mut cache = ValueCache::new();
        cache.insert(kp("user"), Value::object());
        cache.insert(kp("user.name"), Value::from("Ann"));
        cache.insert(kp("user.address.city"), Value::from("Oslo"));
        cache.insert(kp("other"), Value::from(1));

        let removed = cache.invalidate(&kp("user"), None);
        assert_eq!(removed, 3);
        assert!(!cache.contains(&kp("user")));
        assert!(!cache.contains(&kp("user.name")));
        assert!(!cache.contains(&kp("user.address.city")));
        assert!(cache.contains(&kp("other")));
    }

    #[test]
    fn invalidate_reaches_children_when_parent_not_cached() {
        let mut cache = ValueCache::new();
        cache.insert(kp("a.b"), Value::from(1));
        assert!(!cache.contains(&kp("a")));
        assert_eq!(cache.invalidate(&kp("a"), None), 1);
        assert!(!cache.contains(&kp("a.b")));
        assert_eq!(cache.invalidate(&kp("a"), None), 0);
    }

    #[test]
    fn invalidate_detaches_idle_arrays_only() {
        let mut cache = ValueCache::new();
        let mut tracker = ArrayTracker::new();
        let idle = Array::new(vec![Value::from(1)]);
        let busy = Array::new(vec![Value::from(2)]);
        tracker.associate(idle.id(), kp("idle"));
        tracker.associate(busy.id(), kp("busy"));
        tracker.begin_setting(busy.id());
        cache.insert(kp("idle"), Value::Array(idle.clone()));
        cache.insert(kp("busy"), Value::Array(busy.clone()));

        cache.invalidate(&Keypath::root(), Some(&mut tracker));
        assert!(!tracker.is_tracked(idle.id()));
        assert!(tracker.is_tracked(busy.id()));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_detaches_arrays_no_longer_cached() {
        let mut cache = ValueCache::new();
        let mut tracker = ArrayTracker::new();
        let array = Array::new(vec![Value::from(1)]);
        tracker.associate(array.id(), kp("list"));
        cache.insert(kp("list"), Value::Array(array.clone()));
        cache.remove(&kp("list"));

        assert_eq!(cache.invalidate(&kp("list"), Some(&mut tracker)), 0);
        assert!(!tracker.is_tracked(array.id()));
    }
}
