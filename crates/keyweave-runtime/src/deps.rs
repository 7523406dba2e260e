#![forbid(unsafe_code)]

//! Keypath → observer registry, partitioned by priority tier.
//!
//! Each keypath maps to an ordered map of tiers; each tier is an
//! insertion-ordered set of distinct observers. Lower tiers are notified
//! first, so structural work (tier 0, 1) settles before display updates.
//!
//! # Invariants
//!
//! 1. An observer appears at most once per keypath and tier.
//! 2. No tier is ever empty: removing the last observer removes the tier.
//! 3. With pruning enabled, no keypath entry is ever empty.

use std::collections::BTreeMap;

use ahash::AHashMap;
use indexmap::IndexSet;
use keyweave_core::Keypath;

use crate::observer::ObserverHandle;

/// Notification tier. Lower values fire first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u32);

impl Priority {
    /// Computed values re-deriving from their sources.
    pub const COMPUTED: Self = Self(0);
    /// Structural observers (sections, lists).
    pub const STRUCTURAL: Self = Self(1);
    /// Leaf display updates.
    pub const DISPLAY: Self = Self(2);

    #[must_use]
    pub const fn new(tier: u32) -> Self {
        Self(tier)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

type ObserverSet = IndexSet<ObserverHandle, ahash::RandomState>;

/// Registry of observers per keypath and tier.
#[derive(Debug)]
pub struct DependencyRegistry {
    entries: AHashMap<Keypath, BTreeMap<Priority, ObserverSet>>,
    prune_empty: bool,
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DependencyRegistry {
    /// Create a registry. `prune_empty` controls whether a keypath entry is
    /// dropped once its last observer is removed.
    #[must_use]
    pub fn new(prune_empty: bool) -> Self {
        Self {
            entries: AHashMap::new(),
            prune_empty,
        }
    }

    /// Register `observer` at `keypath` and `priority`.
    ///
    /// Returns `false` when it was already registered there.
    pub fn register(
        &mut self,
        keypath: &Keypath,
        observer: ObserverHandle,
        priority: Priority,
    ) -> bool {
        self.entries
            .entry(keypath.clone())
            .or_default()
            .entry(priority)
            .or_default()
            .insert(observer)
    }

    /// Remove `observer` from `keypath` at `priority`.
    ///
    /// Unknown keypaths, tiers, and observers are ignored. Returns whether
    /// anything was removed.
    pub fn unregister(
        &mut self,
        keypath: &Keypath,
        observer: &ObserverHandle,
        priority: Priority,
    ) -> bool {
        let Some(tiers) = self.entries.get_mut(keypath) else {
            return false;
        };
        let Some(set) = tiers.get_mut(&priority) else {
            return false;
        };
        if !set.shift_remove(observer) {
            return false;
        }
        if set.is_empty() {
            tiers.remove(&priority);
        }
        if tiers.is_empty() && self.prune_empty {
            self.entries.remove(keypath);
        }
        true
    }

    /// Whether `observer` is registered at `keypath` and `priority`.
    #[must_use]
    pub fn contains(
        &self,
        keypath: &Keypath,
        observer: &ObserverHandle,
        priority: Priority,
    ) -> bool {
        self.entries
            .get(keypath)
            .and_then(|tiers| tiers.get(&priority))
            .is_some_and(|set| set.contains(observer))
    }

    /// Tiers currently populated at `keypath`, ascending.
    #[must_use]
    pub fn tiers(&self, keypath: &Keypath) -> Vec<Priority> {
        self.entries
            .get(keypath)
            .map(|tiers| tiers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the observers at `keypath` and `priority`, in
    /// registration order.
    #[must_use]
    pub fn observers(&self, keypath: &Keypath, priority: Priority) -> Vec<ObserverHandle> {
        self.entries
            .get(keypath)
            .and_then(|tiers| tiers.get(&priority))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `keypath` has an entry (possibly empty when pruning is off).
    #[must_use]
    pub fn has_entry(&self, keypath: &Keypath) -> bool {
        self.entries.contains_key(keypath)
    }

    /// Number of observers at `keypath` across all tiers.
    #[must_use]
    pub fn observer_count(&self, keypath: &Keypath) -> usize {
        self.entries
            .get(keypath)
            .map_or(0, |tiers| tiers.values().map(IndexSet::len).sum())
    }

    /// Number of keypath entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
