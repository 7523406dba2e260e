#![forbid(unsafe_code)]

//! Association table between array identities and the keypaths they are
//! bound to.
//!
//! With array mutation tracking enabled, every keypath an array is read
//! through is recorded against the array's [`ArrayId`]. Mutating the array
//! then notifies all of those keypaths. The table never owns the arrays.
//!
//! A keypath holds at most one array at a time, so the table also keeps the
//! reverse binding. Releasing a keypath needs only the keypath, not the
//! value that was cached there.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexSet;
use keyweave_core::{ArrayId, Keypath};

#[derive(Debug, Default)]
pub struct ArrayTracker {
    watchers: AHashMap<ArrayId, IndexSet<Keypath>>,
    bound: AHashMap<Keypath, ArrayId>,
    setting: AHashSet<ArrayId>,
}

impl ArrayTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `array` is reachable at `keypath`, replacing whatever
    /// array was bound there before.
    pub fn associate(&mut self, array: ArrayId, keypath: Keypath) -> bool {
        if let Some(previous) = self.bound.get(&keypath).copied()
            && previous != array
        {
            self.detach(previous, &keypath);
        }
        self.bound.insert(keypath.clone(), array);
        self.watchers.entry(array).or_default().insert(keypath)
    }

    /// Forget that `array` is reachable at `keypath`.
    pub fn detach(&mut self, array: ArrayId, keypath: &Keypath) -> bool {
        let Some(keypaths) = self.watchers.get_mut(&array) else {
            return false;
        };
        let removed = keypaths.shift_remove(keypath);
        if keypaths.is_empty() {
            self.watchers.remove(&array);
        }
        if self.bound.get(keypath) == Some(&array) {
            self.bound.remove(keypath);
        }
        removed
    }

    /// Array currently bound at `keypath`.
    #[must_use]
    pub fn array_at(&self, keypath: &Keypath) -> Option<ArrayId> {
        self.bound.get(keypath).copied()
    }

    /// Unbind whatever array `keypath` holds, unless that array is
    /// mid-mutation. Returns the released array.
    pub fn release(&mut self, keypath: &Keypath) -> Option<ArrayId> {
        let array = self.array_at(keypath)?;
        if self.is_setting(array) {
            return None;
        }
        self.detach(array, keypath);
        Some(array)
    }

    /// Keypaths currently bound to `array`.
    #[must_use]
    pub fn keypaths(&self, array: ArrayId) -> Vec<Keypath> {
        self.watchers
            .get(&array)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_tracked(&self, array: ArrayId) -> bool {
        self.watchers.contains_key(&array)
    }

    /// Mark `array` as being written through its own mutation path.
    pub fn begin_setting(&mut self, array: ArrayId) {
        self.setting.insert(array);
    }

    pub fn end_setting(&mut self, array: ArrayId) {
        self.setting.remove(&array);
    }

    /// Whether `array` is mid-mutation; its associations survive cache
    /// invalidation while this holds.
    #[must_use]
    pub fn is_setting(&self, array: ArrayId) -> bool {
        self.setting.contains(&array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyweave_core::Array;

    #[test]
    fn associate_and_detach() {
        let mut tracker = ArrayTracker::new();
        let id = Array::default().id();
        assert!(tracker.associate(id, Keypath::new("a")));
        assert!(!tracker.associate(id, Keypath::new("a")));
        assert!(tracker.associate(id, Keypath::new("b")));
        assert_eq!(tracker.keypaths(id), vec![Keypath::new("a"), Keypath::new("b")]);

        assert!(tracker.detach(id, &Keypath::new("a")));
        assert!(!tracker.detach(id, &Keypath::new("a")));
        assert!(tracker.detach(id, &Keypath::new("b")));
        assert!(!tracker.is_tracked(id));
    }

    #[test]
    fn rebinding_a_keypath_detaches_the_previous_array() {
        let mut tracker = ArrayTracker::new();
        let old = Array::default().id();
        let new = Array::default().id();
        tracker.associate(old, Keypath::new("a"));
        tracker.associate(old, Keypath::new("b"));
        tracker.associate(new, Keypath::new("a"));
        assert_eq!(tracker.keypaths(old), vec![Keypath::new("b")]);
        assert_eq!(tracker.array_at(&Keypath::new("a")), Some(new));
    }

    #[test]
    fn release_skips_arrays_mid_mutation() {
        let mut tracker = ArrayTracker::new();
        let id = Array::default().id();
        tracker.associate(id, Keypath::new("a"));
        tracker.begin_setting(id);
        assert_eq!(tracker.release(&Keypath::new("a")), None);
        assert!(tracker.is_tracked(id));
        tracker.end_setting(id);
        assert_eq!(tracker.release(&Keypath::new("a")), Some(id));
        assert_eq!(tracker.array_at(&Keypath::new("a")), None);
        assert!(!tracker.is_tracked(id));
        assert_eq!(tracker.release(&Keypath::new("a")), None);
    }

    #[test]
    fn setting_flag_round_trip() {
        let mut tracker = ArrayTracker::new();
        let id = Array::default().id();
        assert!(!tracker.is_setting(id));
        tracker.begin_setting(id);
        assert!(tracker.is_setting(id));
        tracker.end_setting(id);
        assert!(!tracker.is_setting(id));
    }
}
