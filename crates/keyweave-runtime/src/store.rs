#![forbid(unsafe_code)]

//! The store: data, cache, registries, and computations behind one handle.
//!
//! # Write path
//!
//! [`Store::set`] writes the value, then:
//!
//! 1. clears the cache at the keypath and below, and the ancestors' own
//!    entries (an ancestor's value contains the written one);
//! 2. notifies observers of the keypath and every cached or observed
//!    descendant, breadth-first, tiers ascending;
//! 3. notifies the direct observers of each ancestor, nearest first;
//! 4. retries pending references.
//!
//! Writes to a computed keypath (or below one) go to the computation or its
//! node instead of the data.
//!
//! # Re-entrancy
//!
//! No internal borrow is held while an observer, getter, or setter runs, so
//! any of them may read, write, register, or unregister. Each tier is
//! snapshotted before delivery and every observer is re-checked against the
//! live registry right before its update: an observer removed earlier in
//! the same pass is skipped, one added during the pass is not delivered to
//! until the next change.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use keyweave_core::{ArrayId, Gettable, Keypath, Value, resolve_reference};
use tracing::{debug, debug_span, trace};

use crate::arrays::ArrayTracker;
use crate::cache::ValueCache;
use crate::capture;
use crate::computation::{Computation, Getter, Setter};
use crate::config::StoreConfig;
use crate::deps::{DependencyRegistry, Priority};
use crate::observer::ObserverHandle;
use crate::pending::{PendingRegistry, ResolveRequest};

struct StoreInner {
    config: StoreConfig,
    data: Value,
    cache: ValueCache,
    deps: DependencyRegistry,
    pending: PendingRegistry,
    arrays: ArrayTracker,
    computations: AHashMap<Keypath, Computation>,
}

/// Shared handle to a keypath-addressed data tree and its dependency graph.
///
/// Cloning a `Store` creates a new handle to the same state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

/// Non-owning handle to a [`Store`].
#[derive(Clone, Default)]
pub struct WeakStore {
    inner: Weak<RefCell<StoreInner>>,
}

impl WeakStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("config", &inner.config)
            .field("cached", &inner.cache.len())
            .field("observed_keypaths", &inner.deps.len())
            .field("pending", &inner.pending.len())
            .field("computations", &inner.computations.len())
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Value::object())
    }
}

impl Store {
    /// Create a store over `data` with the default configuration.
    pub fn new(data: impl Into<Value>) -> Self {
        Self::with_config(data, StoreConfig::default())
    }

    pub fn with_config(data: impl Into<Value>, config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                config,
                data: data.into(),
                cache: ValueCache::new(),
                deps: DependencyRegistry::new(config.prune_empty_keypaths),
                pending: PendingRegistry::new(),
                arrays: ArrayTracker::new(),
                computations: AHashMap::new(),
            })),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.inner.borrow().config
    }

    // --- reads -----------------------------------------------------------

    /// Value at `keypath`, recording the read in the current capture scope.
    ///
    /// Missing keypaths read as [`Value::Undefined`].
    #[must_use]
    pub fn get(&self, keypath: &Keypath) -> Value {
        capture::record(keypath);
        self.get_untracked(keypath)
    }

    /// Value at `keypath`, served from and stored into the cache, without
    /// recording a dependency.
    #[must_use]
    pub fn get_untracked(&self, keypath: &Keypath) -> Value {
        if let Some(value) = self.inner.borrow().cache.get(keypath) {
            return value.clone();
        }
        let value = self.fresh_value(keypath);
        let mut inner = self.inner.borrow_mut();
        if inner.config.modify_arrays
            && let Value::Array(array) = &value
        {
            inner.arrays.associate(array.id(), keypath.clone());
        }
        inner.cache.insert(keypath.clone(), value.clone());
        value
    }

    /// Value at `keypath` from the cache if present, otherwise computed
    /// fresh without populating the cache.
    #[must_use]
    pub fn peek(&self, keypath: &Keypath) -> Value {
        if let Some(value) = self.cached(keypath) {
            return value;
        }
        self.fresh_value(keypath)
    }

    /// The cached value at `keypath`, if any.
    #[must_use]
    pub fn cached(&self, keypath: &Keypath) -> Option<Value> {
        self.inner.borrow().cache.get(keypath).cloned()
    }

    /// Resolve `reference` against this store's data and computations.
    #[must_use]
    pub fn resolve_reference(&self, reference: &str, context_stack: &[Keypath]) -> Option<Keypath> {
        resolve_reference(self, reference, context_stack)
    }

    fn fresh_value(&self, keypath: &Keypath) -> Value {
        if let Some((computation, rest)) = self.computation_for(keypath) {
            return match computation.node_at(&rest) {
                Some(node) => node.get(false),
                None => computation.get(false),
            };
        }
        self.inner
            .borrow()
            .data
            .get_path(keypath)
            .cloned()
            .unwrap_or_default()
    }

    /// The computation at `keypath` or its nearest computed ancestor, with
    /// the segments below it.
    fn computation_for<'k>(&self, keypath: &'k Keypath) -> Option<(Computation, Vec<&'k str>)> {
        let inner = self.inner.borrow();
        if inner.computations.is_empty() {
            return None;
        }
        std::iter::once(keypath.clone())
            .chain(keypath.ancestors())
            .find_map(|candidate| {
                let computation = inner.computations.get(&candidate)?;
                let rest = candidate.relative_segments(keypath)?;
                Some((computation.clone(), rest))
            })
    }

    // --- writes ----------------------------------------------------------

    /// Write `value` at `keypath` and propagate the change.
    pub fn set(&self, keypath: &Keypath, value: impl Into<Value>) {
        let value = value.into();
        let _span = debug_span!("store.set", keypath = %keypath).entered();

        if let Some((computation, rest)) = self.computation_for(keypath) {
            match computation.node_at(&rest) {
                Some(node) => node.apply_value(value),
                None => {
                    computation.apply_value(value);
                }
            }
        } else {
            let written = self.inner.borrow_mut().data.set_path(keypath, value);
            if !written {
                debug!(keypath = %keypath, "write does not fit the data shape, ignored");
                return;
            }
            self.changed(keypath);
        }
        self.retry_pending();
    }

    /// Replace the whole data tree.
    pub fn reset(&self, data: impl Into<Value>) {
        self.set(&Keypath::root(), data);
    }

    /// Mutate the array at `keypath` in place.
    ///
    /// The array keeps its identity. With array tracking enabled every
    /// keypath the array has been read through is updated and notified, not
    /// just `keypath`. Returns `false` when the value there is not an array.
    pub fn mutate_array(&self, keypath: &Keypath, f: impl FnOnce(&mut Vec<Value>)) -> bool {
        let Value::Array(mut array) = self.get_untracked(keypath) else {
            return false;
        };
        f(array.items_mut());
        let id = array.id();

        let mut targets = self.array_keypaths(id);
        if !targets.contains(keypath) {
            targets.insert(0, keypath.clone());
        }
        // Computed keypaths follow their sources on their own.
        targets.retain(|target| self.computation_for(target).is_none());
        {
            // A binding whose keypath no longer holds this array is stale.
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            targets.retain(|target| {
                let holds = target == keypath
                    || matches!(
                        inner.data.get_path(target),
                        Some(Value::Array(held)) if held.id() == id
                    );
                if !holds {
                    inner.arrays.detach(id, target);
                    debug!(keypath = %target, array = id.raw(), "stale array binding dropped");
                }
                holds
            });
        }

        {
            let mut inner = self.inner.borrow_mut();
            inner.arrays.begin_setting(id);
            for target in &targets {
                inner.data.set_path(target, Value::Array(array.clone()));
            }
        }
        for target in &targets {
            self.invalidate_with_ancestors(target);
        }
        self.inner.borrow_mut().arrays.end_setting(id);
        debug!(keypath = %keypath, array = id.raw(), targets = targets.len(), "array mutated");

        for target in &targets {
            self.notify_dependants(target);
            self.notify_upstream(target);
        }
        self.retry_pending();
        true
    }

    /// Keypaths the array `id` is currently bound to.
    #[must_use]
    pub fn array_keypaths(&self, id: ArrayId) -> Vec<Keypath> {
        self.inner.borrow().arrays.keypaths(id)
    }

    /// Invalidate and notify as if `keypath` had just been written.
    pub(crate) fn changed(&self, keypath: &Keypath) {
        self.invalidate_with_ancestors(keypath);
        self.notify_dependants(keypath);
        self.notify_upstream(keypath);
    }

    /// Re-check `keypath`: if its cached value differs from its current
    /// value, propagate a change. Uncached keypaths were already
    /// invalidated and are left alone.
    pub(crate) fn mark(&self, keypath: &Keypath) {
        let Some(cached) = self.cached(keypath) else {
            return;
        };
        if cached != self.fresh_value(keypath) {
            debug!(keypath = %keypath, "marked keypath changed");
            self.changed(keypath);
        }
    }

    fn invalidate_with_ancestors(&self, keypath: &Keypath) {
        self.clear_cache(keypath);
        let mut inner = self.inner.borrow_mut();
        for ancestor in keypath.ancestors() {
            inner.cache.remove(&ancestor);
        }
    }

    // --- cache -----------------------------------------------------------

    /// Clear the cache at `keypath` and every descendant. Returns the number
    /// of entries removed.
    pub fn clear_cache(&self, keypath: &Keypath) -> usize {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let arrays = inner.config.modify_arrays.then_some(&mut inner.arrays);
        let removed = inner.cache.invalidate(keypath, arrays);
        if removed > 0 {
            debug!(keypath = %keypath, removed, "cache invalidated");
        }
        removed
    }

    /// Direct child keypaths of `keypath` known to the cache index.
    #[must_use]
    pub fn child_keypaths(&self, keypath: &Keypath) -> Vec<Keypath> {
        self.inner.borrow().cache.children(keypath)
    }

    // --- dependants ------------------------------------------------------

    /// Register `observer` at `keypath` and `priority`. Returns `false` if
    /// it was already registered there.
    pub fn register_dependant(
        &self,
        keypath: &Keypath,
        observer: ObserverHandle,
        priority: Priority,
    ) -> bool {
        let mut inner = self.inner.borrow_mut();
        inner.cache.link(keypath);
        inner.deps.register(keypath, observer, priority)
    }

    /// Remove `observer` from `keypath` at `priority`. Unknown entries are
    /// ignored.
    pub fn unregister_dependant(
        &self,
        keypath: &Keypath,
        observer: &ObserverHandle,
        priority: Priority,
    ) -> bool {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let removed = inner.deps.unregister(keypath, observer, priority);
        if removed
            && inner.config.modify_arrays
            && inner.deps.observer_count(keypath) == 0
            && let Some(id) = inner.arrays.array_at(keypath)
        {
            // Unobserved: forget the binding, the next read re-establishes it.
            inner.arrays.detach(id, keypath);
            inner.cache.remove(keypath);
        }
        removed
    }

    #[must_use]
    pub fn has_dependants(&self, keypath: &Keypath) -> bool {
        self.inner.borrow().deps.observer_count(keypath) > 0
    }

    #[must_use]
    pub fn dependant_count(&self, keypath: &Keypath) -> usize {
        self.inner.borrow().deps.observer_count(keypath)
    }

    /// Whether the registry keeps an entry for `keypath`.
    #[must_use]
    pub fn has_dependency_entry(&self, keypath: &Keypath) -> bool {
        self.inner.borrow().deps.has_entry(keypath)
    }

    /// Notify observers of `keypath` and, breadth-first, of every
    /// descendant in the cache index. Returns the number of updates
    /// delivered.
    pub fn notify_dependants(&self, keypath: &Keypath) -> usize {
        let mut delivered = 0;
        let mut queue = VecDeque::from([keypath.clone()]);
        while let Some(current) = queue.pop_front() {
            delivered += self.deliver(&current);
            queue.extend(self.child_keypaths(&current));
        }
        debug!(keypath = %keypath, delivered, "dependants notified");
        delivered
    }

    /// Notify the direct observers of each ancestor of `keypath`, nearest
    /// first.
    fn notify_upstream(&self, keypath: &Keypath) -> usize {
        keypath.ancestors().map(|ancestor| self.deliver(&ancestor)).sum()
    }

    fn deliver(&self, keypath: &Keypath) -> usize {
        let tiers = self.inner.borrow().deps.tiers(keypath);
        let mut delivered = 0;
        for priority in tiers {
            let observers = self.inner.borrow().deps.observers(keypath, priority);
            for observer in observers {
                if !self.inner.borrow().deps.contains(keypath, &observer, priority) {
                    trace!(keypath = %keypath, "observer removed mid-pass, skipped");
                    continue;
                }
                trace!(keypath = %keypath, priority = priority.raw(), "update");
                observer.update();
                delivered += 1;
            }
        }
        delivered
    }

    // --- pending resolution ----------------------------------------------

    /// Park an observer that waits for some reference to resolve.
    pub fn register_pending(&self, observer: ObserverHandle) {
        self.inner.borrow_mut().pending.register(observer);
    }

    /// Resolve `reference` now, or park `observer` until a later write makes
    /// it resolvable, at which point it receives
    /// [`resolved`](crate::Observer::resolved).
    pub fn register_pending_reference(
        &self,
        reference: &str,
        context_stack: &[Keypath],
        observer: ObserverHandle,
    ) -> Option<Keypath> {
        if let Some(keypath) = self.resolve_reference(reference, context_stack) {
            return Some(keypath);
        }
        trace!(reference, "reference parked");
        self.inner.borrow_mut().pending.register_request(
            observer,
            ResolveRequest {
                reference: reference.to_owned(),
                context: context_stack.to_vec(),
            },
        );
        None
    }

    /// Strike `observer` from the pending list. Returns whether it was
    /// found; cancelling an unknown observer is a no-op.
    pub fn cancel_pending_resolution(&self, observer: &ObserverHandle) -> bool {
        let cancelled = self.inner.borrow_mut().pending.cancel(observer);
        debug!(cancelled, "pending resolution cancel");
        cancelled
    }

    /// Retry every parked reference. Returns how many resolved.
    pub fn retry_pending(&self) -> usize {
        let requests = self.inner.borrow().pending.requests();
        let mut resolved = 0;
        for (observer, request) in requests {
            let Some(keypath) = self.resolve_reference(&request.reference, &request.context) else {
                continue;
            };
            // An earlier resolution in this pass may have cancelled it.
            if !self.inner.borrow_mut().pending.remove_request(&observer, &request) {
                continue;
            }
            debug!(
                reference = %request.reference,
                keypath = %keypath,
                "pending reference resolved"
            );
            observer.resolved(&keypath);
            resolved += 1;
        }
        resolved
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    // --- computations ----------------------------------------------------

    /// Install a read-only computation at `keypath`.
    pub fn compute(
        &self,
        keypath: &Keypath,
        getter: impl Fn(&Store) -> Value + 'static,
    ) -> Computation {
        self.install(keypath, Rc::new(getter), None)
    }

    /// Install a computation whose value can be written back through
    /// `setter`.
    pub fn compute_with_setter(
        &self,
        keypath: &Keypath,
        getter: impl Fn(&Store) -> Value + 'static,
        setter: impl Fn(&Store, Value) + 'static,
    ) -> Computation {
        self.install(keypath, Rc::new(getter), Some(Rc::new(setter)))
    }

    fn install(&self, keypath: &Keypath, getter: Getter, setter: Option<Setter>) -> Computation {
        let sync_children = self.config().sync_computed_children;
        let computation = Computation::new(
            keypath.clone(),
            getter,
            setter,
            sync_children,
            self.downgrade(),
        );
        let previous = self
            .inner
            .borrow_mut()
            .computations
            .insert(keypath.clone(), computation.clone());
        if let Some(previous) = previous {
            previous.detach(self);
        }
        debug!(keypath = %keypath, "computation installed");
        self.changed(keypath);
        computation
    }

    /// The computation installed at exactly `keypath`.
    #[must_use]
    pub fn computation(&self, keypath: &Keypath) -> Option<Computation> {
        self.inner.borrow().computations.get(keypath).cloned()
    }

    /// Remove the computation at `keypath`. Reads fall through to the data
    /// again.
    pub fn remove_computation(&self, keypath: &Keypath) -> bool {
        let removed = self.inner.borrow_mut().computations.remove(keypath);
        let Some(computation) = removed else {
            return false;
        };
        computation.detach(self);
        self.changed(keypath);
        true
    }
}

impl Gettable for Store {
    fn owns_key(&self, keypath: &Keypath, key: &str) -> bool {
        if self.inner.borrow().computations.contains_key(&keypath.join(key)) {
            return true;
        }
        self.peek(keypath).owns_key(key)
    }

    fn is_defined(&self, keypath: &Keypath) -> bool {
        self.peek(keypath).is_defined()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyweave_core::Array;
    use serde_json::json;
    use std::cell::{Cell, RefCell as StdRefCell};
    use std::sync::{Arc, Mutex};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    fn kp(s: &str) -> Keypath {
        Keypath::new(s)
    }

    fn counter() -> (Rc<Cell<u32>>, ObserverHandle) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (hits, ObserverHandle::from_fn(move || h.set(h.get() + 1)))
    }

    fn users() -> Store {
        Store::new(Value::from(json!({
            "user": { "name": "Ann", "address": { "city": "Oslo" } },
            "items": [1, 2, 3]
        })))
    }

    #[test]
    fn get_populates_cache_and_set_clears_it() {
        let s = users();
        assert_eq!(s.cached(&kp("user.name")), None);
        assert_eq!(s.get(&kp("user.name")), Value::from("Ann"));
        assert_eq!(s.cached(&kp("user.name")), Some(Value::from("Ann")));

        s.set(&kp("user.name"), "Bea");
        assert_eq!(s.cached(&kp("user.name")), None);
        assert_eq!(s.get(&kp("user.name")), Value::from("Bea"));
    }

    #[test]
    fn missing_keypath_reads_undefined() {
        let s = users();
        assert_eq!(s.get(&kp("user.phone")), Value::Undefined);
        assert_eq!(s.get(&kp("nothing.here")), Value::Undefined);
    }

    #[test]
    fn set_notifies_observer_exactly_once() {
        let s = users();
        let (hits, obs) = counter();
        s.register_dependant(&kp("user.name"), obs, Priority::DISPLAY);
        s.set(&kp("user.name"), "Bea");
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn set_on_parent_reaches_descendants() {
        let s = users();
        let (name_hits, name) = counter();
        let (city_hits, city) = counter();
        s.register_dependant(&kp("user.name"), name, Priority::DISPLAY);
        s.register_dependant(&kp("user.address.city"), city, Priority::DISPLAY);
        let _ = s.get(&kp("user.address.city"));

        s.set(&kp("user"), Value::from(json!({ "name": "Cy" })));
        assert_eq!(name_hits.get(), 1);
        assert_eq!(city_hits.get(), 1);
        assert_eq!(s.cached(&kp("user.address.city")), None);
        assert_eq!(s.get(&kp("user.address.city")), Value::Undefined);
    }

    #[test]
    fn set_on_child_notifies_ancestors_directly() {
        let s = users();
        let (user_hits, user) = counter();
        let (root_hits, root) = counter();
        let (sibling_hits, sibling) = counter();
        s.register_dependant(&kp("user"), user, Priority::STRUCTURAL);
        s.register_dependant(&Keypath::root(), root, Priority::STRUCTURAL);
        s.register_dependant(&kp("items"), sibling, Priority::DISPLAY);
        let _ = s.get(&kp("user"));

        s.set(&kp("user.address.city"), "Rome");
        assert_eq!(user_hits.get(), 1);
        assert_eq!(root_hits.get(), 1);
        assert_eq!(sibling_hits.get(), 0);
        assert_eq!(s.cached(&kp("user")), None);
    }

    #[test]
    fn tiers_fire_ascending_and_in_registration_order() {
        let s = users();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let tiers = [
            ("display-a", 2),
            ("computed", 0),
            ("display-b", 2),
            ("structural", 1),
        ];
        for (label, tier) in tiers {
            let log = Rc::clone(&log);
            s.register_dependant(
                &kp("user.name"),
                ObserverHandle::from_fn(move || log.borrow_mut().push(label)),
                Priority(tier),
            );
        }
        s.set(&kp("user.name"), "Bea");
        assert_eq!(
            *log.borrow(),
            vec!["computed", "structural", "display-a", "display-b"]
        );
    }

    #[test]
    fn observer_removed_mid_pass_is_skipped() {
        let s = users();
        let (second_hits, second) = counter();
        let store = s.clone();
        let victim = second.clone();
        let first = ObserverHandle::from_fn(move || {
            store.unregister_dependant(&kp("user.name"), &victim, Priority::DISPLAY);
        });
        s.register_dependant(&kp("user.name"), first, Priority::DISPLAY);
        s.register_dependant(&kp("user.name"), second, Priority::DISPLAY);

        s.set(&kp("user.name"), "Bea");
        assert_eq!(second_hits.get(), 0);
        assert_eq!(s.dependant_count(&kp("user.name")), 1);
    }

    #[test]
    fn observer_added_mid_pass_waits_for_next_change() {
        let s = users();
        let (late_hits, late) = counter();
        let store = s.clone();
        let added = Rc::new(Cell::new(false));
        let flag = Rc::clone(&added);
        let adder = ObserverHandle::from_fn(move || {
            if !flag.replace(true) {
                store.register_dependant(&kp("user.name"), late.clone(), Priority::DISPLAY);
            }
        });
        s.register_dependant(&kp("user.name"), adder, Priority::DISPLAY);

        s.set(&kp("user.name"), "Bea");
        assert_eq!(late_hits.get(), 0);
        s.set(&kp("user.name"), "Cy");
        assert_eq!(late_hits.get(), 1);
    }

    #[test]
    fn observer_can_read_during_update() {
        let s = users();
        let seen = Rc::new(StdRefCell::new(Value::Undefined));
        let store = s.clone();
        let out = Rc::clone(&seen);
        s.register_dependant(
            &kp("user.name"),
            ObserverHandle::from_fn(move || *out.borrow_mut() = store.get(&kp("user.name"))),
            Priority::DISPLAY,
        );
        s.set(&kp("user.name"), "Bea");
        assert_eq!(*seen.borrow(), Value::from("Bea"));
    }

    #[test]
    fn named_key_below_array_is_ignored() {
        let s = users();
        let (hits, obs) = counter();
        s.register_dependant(&kp("items.length"), obs, Priority::DISPLAY);
        s.set(&kp("items.length"), 9);
        assert_eq!(hits.get(), 0);
        assert_eq!(s.get(&kp("items")).as_array().map(Array::len), Some(3));
    }

    #[test]
    fn reset_replaces_everything() {
        let s = users();
        let (hits, obs) = counter();
        s.register_dependant(&kp("user.name"), obs, Priority::DISPLAY);
        let _ = s.get(&kp("user.name"));
        s.reset(Value::from(json!({ "other": true })));
        assert_eq!(hits.get(), 1);
        assert_eq!(s.get(&kp("user.name")), Value::Undefined);
        assert_eq!(s.get(&kp("other")), Value::Bool(true));
    }

    #[test]
    fn pruning_follows_config() {
        let pruned = users();
        let kept = Store::with_config(
            Value::object(),
            StoreConfig::default().prune_empty_keypaths(false),
        );
        for s in [&pruned, &kept] {
            let obs = ObserverHandle::from_fn(|| {});
            s.register_dependant(&kp("a"), obs.clone(), Priority::DISPLAY);
            s.unregister_dependant(&kp("a"), &obs, Priority::DISPLAY);
        }
        assert!(!pruned.has_dependency_entry(&kp("a")));
        assert!(kept.has_dependency_entry(&kp("a")));
    }

    #[test]
    fn register_links_child_index() {
        let s = users();
        s.register_dependant(
            &kp("user.address.zip"),
            ObserverHandle::from_fn(|| {}),
            Priority::DISPLAY,
        );
        assert_eq!(s.child_keypaths(&kp("user.address")), vec![kp("user.address.zip")]);
    }

    #[test]
    fn pending_reference_resolves_on_write() {
        let s = users();
        let found = Rc::new(StdRefCell::new(None));
        struct Waiter(Rc<StdRefCell<Option<Keypath>>>);
        impl crate::Observer for Waiter {
            fn update(&self) {}
            fn resolved(&self, keypath: &Keypath) {
                *self.0.borrow_mut() = Some(keypath.clone());
            }
        }
        let waiter = ObserverHandle::new(Waiter(Rc::clone(&found)));

        let ctx = [kp("user")];
        assert_eq!(s.register_pending_reference("nickname", &ctx, waiter), None);
        assert_eq!(s.pending_count(), 1);

        s.set(&kp("user.nickname"), "A");
        assert_eq!(*found.borrow(), Some(kp("user.nickname")));
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn resolvable_reference_is_not_parked() {
        let s = users();
        let obs = ObserverHandle::from_fn(|| {});
        assert_eq!(
            s.register_pending_reference("name", &[kp("user")], obs),
            Some(kp("user.name"))
        );
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn cancelled_pending_never_fires() {
        let s = users();
        let (hits, obs) = counter();
        s.register_pending_reference("later", &[], obs.clone());
        assert!(s.cancel_pending_resolution(&obs));
        assert!(!s.cancel_pending_resolution(&obs));
        s.set(&kp("later"), 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn mutate_array_keeps_identity_and_notifies_bound_keypaths() {
        let s = Store::with_config(
            Value::from(json!({ "items": [1, 2] })),
            StoreConfig::default().modify_arrays(true),
        );
        let Value::Array(original) = s.get(&kp("items")) else {
            panic!("items should be an array");
        };
        s.set(&kp("alias"), Value::Array(original.clone()));
        let _ = s.get(&kp("alias"));
        assert_eq!(s.array_keypaths(original.id()), vec![kp("items"), kp("alias")]);

        let (items_hits, items_obs) = counter();
        let (alias_hits, alias_obs) = counter();
        s.register_dependant(&kp("items"), items_obs, Priority::DISPLAY);
        s.register_dependant(&kp("alias"), alias_obs, Priority::DISPLAY);

        assert!(s.mutate_array(&kp("items"), |items| items.push(Value::from(3))));
        assert_eq!(items_hits.get(), 1);
        assert_eq!(alias_hits.get(), 1);
        let Value::Array(after) = s.get(&kp("alias")) else {
            panic!("alias should be an array");
        };
        assert_eq!(after.id(), original.id());
        assert_eq!(after.len(), 3);
        assert_eq!(s.array_keypaths(original.id()).len(), 2);
    }

    #[test]
    fn mutate_array_rejects_non_arrays() {
        let s = users();
        assert!(!s.mutate_array(&kp("user"), |items| items.clear()));
    }

    #[test]
    fn overwriting_array_detaches_it() {
        let s = Store::with_config(
            Value::from(json!({ "items": [1] })),
            StoreConfig::default().modify_arrays(true),
        );
        let Value::Array(original) = s.get(&kp("items")) else {
            panic!("items should be an array");
        };
        s.set(&kp("items"), Value::array(vec![]));
        assert!(s.array_keypaths(original.id()).is_empty());
    }

    #[test]
    fn replacing_an_array_after_an_element_write_unbinds_it() {
        let s = Store::with_config(
            Value::from(json!({ "a": [1] })),
            StoreConfig::default().modify_arrays(true),
        );
        let Value::Array(shared) = s.get(&kp("a")) else {
            panic!("a should be an array");
        };
        s.set(&kp("b"), Value::Array(shared.clone()));
        let _ = s.get(&kp("b"));
        s.set(&kp("a.0"), 1);
        s.set(&kp("a"), Value::array(vec![Value::from(100)]));
        assert_eq!(s.array_keypaths(shared.id()), vec![kp("b")]);

        let (a_hits, a_obs) = counter();
        s.register_dependant(&kp("a"), a_obs, Priority::DISPLAY);
        assert!(s.mutate_array(&kp("b"), |items| items.push(Value::from(2))));
        assert_eq!(s.get(&kp("a")), Value::from(json!([100])));
        assert_eq!(s.get(&kp("b")), Value::from(json!([1, 2])));
        assert_eq!(a_hits.get(), 0);
    }

    #[test]
    fn mutate_array_drops_bindings_to_keypaths_that_moved_on() {
        let s = Store::with_config(
            Value::from(json!({ "a": [1] })),
            StoreConfig::default().modify_arrays(true),
        );
        let Value::Array(shared) = s.get(&kp("a")) else {
            panic!("a should be an array");
        };
        s.set(&kp("b"), Value::Array(shared.clone()));
        let _ = s.get(&kp("b"));
        // Replace the data wholesale under a still-cached keypath.
        s.inner
            .borrow_mut()
            .data
            .set_path(&kp("a"), Value::from("gone"));

        assert!(s.mutate_array(&kp("b"), |items| items.clear()));
        assert_eq!(s.peek(&kp("a")), Value::from("gone"));
        assert_eq!(s.array_keypaths(shared.id()), vec![kp("b")]);
    }

    #[test]
    fn out_of_range_index_write_leaves_array_intact() {
        let s = Store::new(Value::from(json!({ "items": [1, 2, 3] })));
        let (hits, obs) = counter();
        s.register_dependant(&kp("items"), obs, Priority::DISPLAY);
        s.set(&kp("items.18446744073709551615"), 1);
        s.set(&kp("items.1000000000000"), 1);
        assert_eq!(s.get(&kp("items")), Value::from(json!([1, 2, 3])));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn computed_keypath_reads_and_reacts() {
        let s = users();
        s.compute(&kp("greeting"), |s| {
            Value::from(format!("hi {}", s.get(&kp("user.name")).as_str().unwrap_or("")))
        });
        let (hits, obs) = counter();
        s.register_dependant(&kp("greeting"), obs, Priority::DISPLAY);
        assert_eq!(s.get(&kp("greeting")), Value::from("hi Ann"));

        s.set(&kp("user.name"), "Bea");
        assert_eq!(hits.get(), 1);
        assert_eq!(s.get(&kp("greeting")), Value::from("hi Bea"));
    }

    #[test]
    fn computation_chain_propagates() {
        let s = Store::new(Value::from(json!({ "n": 2 })));
        s.compute(&kp("double"), |s| Value::from(s.get(&kp("n")).as_f64().unwrap_or(0.0) * 2.0));
        s.compute(&kp("quad"), |s| Value::from(s.get(&kp("double")).as_f64().unwrap_or(0.0) * 2.0));
        assert_eq!(s.get(&kp("quad")), Value::Number(8.0));
        s.set(&kp("n"), 3);
        assert_eq!(s.get(&kp("quad")), Value::Number(12.0));
    }

    #[test]
    fn writing_computed_without_setter_is_ignored() {
        let s = Store::new(Value::from(json!({ "n": 2 })));
        s.compute(&kp("copy"), |s| s.get(&kp("n")));
        s.set(&kp("copy"), 7);
        assert_eq!(s.get(&kp("copy")), Value::Number(2.0));
        assert_eq!(s.get(&kp("n")), Value::Number(2.0));
    }

    #[test]
    fn writing_computed_with_setter_updates_sources() {
        let s = Store::new(Value::from(json!({ "celsius": 0 })));
        s.compute_with_setter(
            &kp("fahrenheit"),
            |s| Value::from(s.get(&kp("celsius")).as_f64().unwrap_or(0.0) * 9.0 / 5.0 + 32.0),
            |s, value| {
                let f = value.as_f64().unwrap_or(32.0);
                s.set(&kp("celsius"), (f - 32.0) * 5.0 / 9.0);
            },
        );
        assert_eq!(s.get(&kp("fahrenheit")), Value::Number(32.0));
        s.set(&kp("fahrenheit"), 212);
        assert_eq!(s.get(&kp("celsius")), Value::Number(100.0));
        assert_eq!(s.get(&kp("fahrenheit")), Value::Number(212.0));
    }

    #[test]
    fn remove_computation_falls_back_to_data() {
        let s = Store::new(Value::from(json!({ "x": 1, "shadow": "data" })));
        s.compute(&kp("shadow"), |s| s.get(&kp("x")));
        assert_eq!(s.get(&kp("shadow")), Value::Number(1.0));
        assert!(s.remove_computation(&kp("shadow")));
        assert!(!s.remove_computation(&kp("shadow")));
        assert_eq!(s.get(&kp("shadow")), Value::from("data"));
        assert!(!s.has_dependants(&kp("x")));
    }

    #[test]
    fn resolver_sees_computed_keypaths() {
        let s = users();
        s.compute(&kp("user.display"), |s| s.get(&kp("user.name")));
        assert_eq!(
            s.resolve_reference("display", &[kp("user")]),
            Some(kp("user.display"))
        );
    }

    #[derive(Clone, Default)]
    struct MessageLog(Arc<Mutex<Vec<String>>>);

    struct MessageLayer(MessageLog);

    struct MessageVisitor<'a>(&'a mut Option<String>);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                *self.0 = Some(format!("{value:?}"));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for MessageLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = None;
            event.record(&mut MessageVisitor(&mut message));
            if let Some(message) = message
                && let Ok(mut log) = (self.0).0.lock()
            {
                log.push(message);
            }
        }
    }

    #[test]
    fn recompute_and_self_read_are_logged() {
        let log = MessageLog::default();
        let subscriber = tracing_subscriber::registry().with(MessageLayer(log.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let s = Store::new(Value::from(json!({ "x": 1 })));
            let c = s.compute(&kp("me"), |s| {
                let _ = s.get(&kp("me"));
                s.get(&kp("x"))
            });
            let _ = c.get(false);
        });
        let messages = log.0.lock().map(|m| m.clone()).unwrap_or_default();
        assert!(messages.iter().any(|m| m == "computation recomputed"), "{messages:?}");
        assert!(
            messages.iter().any(|m| m == "computation re-entered its own evaluation"),
            "{messages:?}"
        );
    }
}
