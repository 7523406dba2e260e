#![forbid(unsafe_code)]

//! Computed values and the lazily-built node tree beneath them.
//!
//! # Design
//!
//! A [`Computation`] is the root of a derived value: a getter evaluated
//! against the [`Store`] inside a capture scope. Every keypath the getter
//! reads becomes a dependency, and the computation registers itself on
//! each one at [`Priority::COMPUTED`]. When any of them changes the
//! computation is marked dirty and the change is propagated, but the getter
//! only runs again on the next read.
//!
//! Reading below a computed keypath (`total.items.0`) goes through
//! [`ComputationNode`]s created on demand by [`join_key`]. Each node
//! derives its value from its parent's value and memoizes it behind its own
//! dirty flag; [`handle_change`] cascades dirtiness through the subtree.
//!
//! # Invariants
//!
//! 1. A node's value is valid only while its dirty flag is clear.
//! 2. `join_key(k)` returns the same node for the same `k` until the node is
//!    re-keyed by [`shuffle`](ComputationNode::shuffle).
//! 3. A node's read-only flag is fixed at construction.
//! 4. `version()` increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Getter reads its own keypath**: the nested read returns the previous
//!   value and a warning is logged; the self-read is not recorded as a
//!   dependency.
//! - **Store dropped**: the computation keeps its last value and stops
//!   recomputing.
//! - **Getter panics**: the panic propagates, the computation stays dirty
//!   and the next read retries the getter.
//!
//! [`join_key`]: Computation::join_key
//! [`handle_change`]: ComputationNode::handle_change

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use keyweave_core::keypath::is_index;
use keyweave_core::{Keypath, Value};
use tracing::{debug, trace, warn};

use crate::capture::{self, CaptureScope};
use crate::deps::Priority;
use crate::observer::ObserverHandle;
use crate::store::{Store, WeakStore};

pub(crate) type Getter = Rc<dyn Fn(&Store) -> Value>;
pub(crate) type Setter = Rc<dyn Fn(&Store, Value)>;

struct ComputationInner {
    keypath: Keypath,
    getter: Getter,
    setter: Option<Setter>,
    value: Value,
    dirty: bool,
    evaluating: bool,
    version: u64,
    dependencies: Vec<Keypath>,
    /// Registered on every dependency; holds only a weak reference back.
    trigger: ObserverHandle,
    children: IndexMap<String, ComputationNode>,
    sync_children: bool,
    store: WeakStore,
}

/// Holds a computation's re-entry flag for the duration of its getter.
struct Evaluating<'a>(&'a RefCell<ComputationInner>);

impl<'a> Evaluating<'a> {
    fn enter(inner: &'a RefCell<ComputationInner>) -> Self {
        inner.borrow_mut().evaluating = true;
        Self(inner)
    }
}

impl Drop for Evaluating<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.try_borrow_mut() {
            inner.evaluating = false;
        }
    }
}

/// Root of a derived value.
///
/// Cloning a `Computation` creates a new handle to the same state.
#[derive(Clone)]
pub struct Computation {
    inner: Rc<RefCell<ComputationInner>>,
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Computation")
            .field("keypath", &inner.keypath)
            .field("value", &inner.value)
            .field("dirty", &inner.dirty)
            .field("version", &inner.version)
            .field("dependencies", &inner.dependencies)
            .finish()
    }
}

impl Computation {
    pub(crate) fn new(
        keypath: Keypath,
        getter: Getter,
        setter: Option<Setter>,
        sync_children: bool,
        store: WeakStore,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<ComputationInner>>| {
            let weak = weak.clone();
            let trigger = ObserverHandle::from_fn(move || {
                if let Some(inner) = weak.upgrade() {
                    Computation { inner }.handle_change();
                }
            });
            RefCell::new(ComputationInner {
                keypath,
                getter,
                setter,
                value: Value::Undefined,
                dirty: true,
                evaluating: false,
                version: 0,
                dependencies: Vec::new(),
                trigger,
                children: IndexMap::new(),
                sync_children,
                store,
            })
        });
        Self { inner }
    }

    #[must_use]
    pub fn keypath(&self) -> Keypath {
        self.inner.borrow().keypath.clone()
    }

    /// Current value, recomputing first if dirty.
    ///
    /// With `capture` set, the read is recorded against the innermost open
    /// capture scope.
    #[must_use]
    pub fn get(&self, capture: bool) -> Value {
        if capture {
            capture::record(&self.keypath());
        }
        self.refresh();
        self.inner.borrow().value.clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty
    }

    /// Number of recomputations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Keypaths read by the last evaluation.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Keypath> {
        self.inner.borrow().dependencies.clone()
    }

    #[must_use]
    pub fn has_setter(&self) -> bool {
        self.inner.borrow().setter.is_some()
    }

    /// Handle observers register on the computation's dependencies.
    #[must_use]
    pub fn trigger(&self) -> ObserverHandle {
        self.inner.borrow().trigger.clone()
    }

    /// Child node for `key`, created on first use. An empty key addresses
    /// the computation itself and yields `None`.
    #[must_use]
    pub fn join_key(&self, key: &str) -> Option<ComputationNode> {
        if key.is_empty() {
            return None;
        }
        let mut inner = self.inner.borrow_mut();
        let read_only = !inner.sync_children;
        let parent = NodeParent::Computation(Rc::downgrade(&self.inner));
        let child = inner
            .children
            .entry(key.to_owned())
            .or_insert_with(|| ComputationNode::new(parent, key.to_owned(), read_only));
        Some(child.clone())
    }

    /// Node at `segments` below the computation, or `None` for an empty
    /// path.
    #[must_use]
    pub fn node_at<S: AsRef<str>>(&self, segments: &[S]) -> Option<ComputationNode> {
        let (first, rest) = segments.split_first()?;
        let node = self.join_key(first.as_ref())?;
        Some(node.join_path(rest))
    }

    /// Mark dirty and propagate: child nodes receive `handle_change`, and
    /// the computation's keypath is invalidated and notified in the store.
    ///
    /// A computation that is already dirty has already propagated since its
    /// last read, so repeated changes are absorbed.
    pub fn handle_change(&self) {
        let (children, keypath, store) = {
            let mut inner = self.inner.borrow_mut();
            if inner.dirty {
                trace!(keypath = %inner.keypath, "computation already dirty");
                return;
            }
            inner.dirty = true;
            (
                inner.children.values().cloned().collect::<Vec<_>>(),
                inner.keypath.clone(),
                inner.store.upgrade(),
            )
        };
        for child in &children {
            child.handle_change();
        }
        if let Some(store) = store {
            store.changed(&keypath);
        }
    }

    /// Write a whole new value through the setter.
    ///
    /// Returns `false` (and leaves everything untouched) when the
    /// computation has no setter.
    pub fn apply_value(&self, value: Value) -> bool {
        let (setter, store, keypath) = {
            let inner = self.inner.borrow();
            (inner.setter.clone(), inner.store.upgrade(), inner.keypath.clone())
        };
        let (Some(setter), Some(store)) = (setter, store) else {
            debug!(keypath = %keypath, "computation has no setter, write ignored");
            return false;
        };
        setter(&store, value);
        self.handle_change();
        true
    }

    fn refresh(&self) {
        let (getter, store) = {
            let inner = self.inner.borrow();
            if !inner.dirty {
                return;
            }
            if inner.evaluating {
                warn!(keypath = %inner.keypath, "computation re-entered its own evaluation");
                return;
            }
            (Rc::clone(&inner.getter), inner.store.upgrade())
        };
        let Some(store) = store else {
            return;
        };

        let evaluating = Evaluating::enter(&self.inner);
        let scope = CaptureScope::start();
        let value = getter(&store);
        let mut captured = scope.finish();
        drop(evaluating);

        let own = self.keypath();
        // A self-read during evaluation may have cached the stale value.
        store.clear_cache(&own);

        let (previous, trigger) = {
            let mut inner = self.inner.borrow_mut();
            captured.retain(|dep| *dep != own && !own.is_ancestor_of(dep));
            inner.value = value;
            inner.dirty = false;
            inner.version += 1;
            debug!(
                keypath = %own,
                version = inner.version,
                dependencies = captured.len(),
                "computation recomputed"
            );
            (
                std::mem::replace(&mut inner.dependencies, captured.clone()),
                inner.trigger.clone(),
            )
        };

        for dep in previous.iter().filter(|dep| !captured.contains(dep)) {
            store.unregister_dependant(dep, &trigger, Priority::COMPUTED);
        }
        for dep in captured.iter().filter(|dep| !previous.contains(dep)) {
            store.register_dependant(dep, trigger.clone(), Priority::COMPUTED);
        }
    }

    /// Write `value` into the current value at `segments`.
    fn write_segments(&self, segments: &[String], value: Value) {
        self.refresh();
        self.inner.borrow_mut().value.set_segments(segments, value);
    }

    /// Push the current value back through the setter, then ask every
    /// dependency to re-check itself.
    fn push_to_sources(&self) {
        let (setter, store, dependencies, value) = {
            let inner = self.inner.borrow();
            (
                inner.setter.clone(),
                inner.store.upgrade(),
                inner.dependencies.clone(),
                inner.value.clone(),
            )
        };
        let Some(store) = store else {
            return;
        };
        if let Some(setter) = setter {
            setter(&store, value);
        }
        for dep in &dependencies {
            store.mark(dep);
        }
    }

    /// Unregister from every dependency and mark dirty.
    pub(crate) fn detach(&self, store: &Store) {
        let (dependencies, trigger) = {
            let mut inner = self.inner.borrow_mut();
            inner.dirty = true;
            (std::mem::take(&mut inner.dependencies), inner.trigger.clone())
        };
        for dep in &dependencies {
            store.unregister_dependant(dep, &trigger, Priority::COMPUTED);
        }
    }
}

enum NodeParent {
    Computation(Weak<RefCell<ComputationInner>>),
    Node(Weak<RefCell<NodeInner>>),
}

impl NodeParent {
    fn upgrade(&self) -> Option<Ancestor> {
        match self {
            Self::Computation(weak) => weak
                .upgrade()
                .map(|inner| Ancestor::Computation(Computation { inner })),
            Self::Node(weak) => weak
                .upgrade()
                .map(|inner| Ancestor::Node(ComputationNode { inner })),
        }
    }
}

enum Ancestor {
    Computation(Computation),
    Node(ComputationNode),
}

impl Ancestor {
    fn value(&self) -> Value {
        match self {
            Self::Computation(c) => c.get(false),
            Self::Node(n) => n.get(false),
        }
    }

    /// Nodes can be re-keyed when the collection they index is reordered;
    /// a computation root cannot.
    fn can_shuffle(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    fn parent(&self) -> Option<Ancestor> {
        match self {
            Self::Computation(_) => None,
            Self::Node(n) => n.inner.borrow().parent.upgrade(),
        }
    }
}

struct NodeInner {
    parent: NodeParent,
    key: String,
    children: IndexMap<String, ComputationNode>,
    value: Value,
    dirty: bool,
    read_only: bool,
    version: u64,
    observers: IndexSet<ObserverHandle, ahash::RandomState>,
    links: Vec<Weak<RefCell<NodeInner>>>,
    bound_value: Option<Value>,
    unresolved: Vec<(String, ObserverHandle)>,
}

/// One path segment below a [`Computation`].
#[derive(Clone)]
pub struct ComputationNode {
    inner: Rc<RefCell<NodeInner>>,
}

impl fmt::Debug for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ComputationNode")
            .field("key", &inner.key)
            .field("value", &inner.value)
            .field("dirty", &inner.dirty)
            .field("read_only", &inner.read_only)
            .field("children", &inner.children.len())
            .finish()
    }
}

impl PartialEq for ComputationNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ComputationNode {}

impl ComputationNode {
    fn new(parent: NodeParent, key: String, read_only: bool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(NodeInner {
                parent,
                key,
                children: IndexMap::new(),
                value: Value::Undefined,
                dirty: true,
                read_only,
                version: 0,
                observers: IndexSet::default(),
                links: Vec::new(),
                bound_value: None,
                unresolved: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        self.inner.borrow().key.clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.borrow().read_only
    }

    /// Number of times the value was re-derived from the parent.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Absolute keypath of this node.
    #[must_use]
    pub fn keypath(&self) -> Keypath {
        let (root, segments) = self.lineage();
        let base = root.map(|r| r.keypath()).unwrap_or_default();
        base.concat(&Keypath::from_segments(&segments))
    }

    /// Current value, re-deriving from the parent first if dirty.
    ///
    /// A missing or non-container parent value yields
    /// [`Value::Undefined`].
    #[must_use]
    pub fn get(&self, capture: bool) -> Value {
        if capture {
            capture::record(&self.keypath());
        }
        let parent = {
            let inner = self.inner.borrow();
            if !inner.dirty {
                return inner.value.clone();
            }
            inner.parent.upgrade()
        };
        let parent_value = parent.map(|p| p.value()).unwrap_or_default();

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.value = parent_value.get_key(&inner.key).cloned().unwrap_or_default();
        inner.dirty = false;
        inner.version += 1;
        inner.value.clone()
    }

    /// Child node for `key`, created on first use. An empty key returns this
    /// node.
    #[must_use]
    pub fn join_key(&self, key: &str) -> ComputationNode {
        if key.is_empty() {
            return self.clone();
        }
        let mut inner = self.inner.borrow_mut();
        let read_only = inner.read_only;
        let parent = NodeParent::Node(Rc::downgrade(&self.inner));
        inner
            .children
            .entry(key.to_owned())
            .or_insert_with(|| ComputationNode::new(parent, key.to_owned(), read_only))
            .clone()
    }

    /// Walk `segments` with [`join_key`](Self::join_key).
    #[must_use]
    pub fn join_path<S: AsRef<str>>(&self, segments: &[S]) -> ComputationNode {
        segments
            .iter()
            .fold(self.clone(), |node, segment| node.join_key(segment.as_ref()))
    }

    /// Child nodes created so far, in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<ComputationNode> {
        self.inner.borrow().children.values().cloned().collect()
    }

    /// Attach an observer notified by [`handle_change`](Self::handle_change).
    pub fn register_observer(&self, observer: ObserverHandle) -> bool {
        self.inner.borrow_mut().observers.insert(observer)
    }

    pub fn unregister_observer(&self, observer: &ObserverHandle) -> bool {
        self.inner.borrow_mut().observers.shift_remove(observer)
    }

    /// Register `alias` to be marked dirty whenever this node changes.
    pub fn link(&self, alias: &ComputationNode) {
        if alias == self {
            return;
        }
        self.inner.borrow_mut().links.push(Rc::downgrade(&alias.inner));
    }

    /// Park an observer waiting for `key` to appear under this node.
    pub fn register_unresolved(&self, key: impl Into<String>, observer: ObserverHandle) {
        self.inner.borrow_mut().unresolved.push((key.into(), observer));
    }

    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.inner.borrow().unresolved.len()
    }

    /// Value cached by a two-way binding, if any.
    #[must_use]
    pub fn bound_value(&self) -> Option<Value> {
        self.inner.borrow().bound_value.clone()
    }

    pub fn set_bound_value(&self, value: Value) {
        self.inner.borrow_mut().bound_value = Some(value);
    }

    /// Mark dirty and propagate through links, observers, and children.
    ///
    /// Observers parked on unresolved keys are released and told to retry.
    pub fn handle_change(&self) {
        let (links, observers, children, unresolved) = {
            let mut inner = self.inner.borrow_mut();
            inner.dirty = true;
            inner.bound_value = None;
            inner.links.retain(|l| l.strong_count() > 0);
            (
                inner.links.iter().filter_map(Weak::upgrade).collect::<Vec<_>>(),
                inner.observers.iter().cloned().collect::<Vec<_>>(),
                inner.children.values().cloned().collect::<Vec<_>>(),
                std::mem::take(&mut inner.unresolved),
            )
        };
        for link in links {
            link.borrow_mut().dirty = true;
        }
        for observer in &observers {
            observer.update();
        }
        for child in &children {
            child.handle_change();
        }
        for (key, observer) in unresolved {
            trace!(key = %key, "unresolved lookup released");
            observer.update();
        }
    }

    /// Store `value` at this node.
    ///
    /// The value is written into the computation's current value and the
    /// change is propagated locally and through the store. Unless the node
    /// is read-only, the write is then pushed upwards: past every ancestor
    /// that can be reshuffled, to the computation root, whose setter
    /// receives the updated value and whose dependencies are re-checked.
    pub fn apply_value(&self, value: Value) {
        let (root, segments) = self.lineage();
        if let Some(root) = &root {
            root.write_segments(&segments, value.clone());
        }

        // Ancestors now hold stale copies of the subtree.
        let mut ancestor = self.inner.borrow().parent.upgrade();
        while let Some(Ancestor::Node(node)) = ancestor {
            let observers = {
                let mut inner = node.inner.borrow_mut();
                inner.dirty = true;
                inner.observers.iter().cloned().collect::<Vec<_>>()
            };
            for observer in &observers {
                observer.update();
            }
            ancestor = node.inner.borrow().parent.upgrade();
        }

        let (links, observers, children, read_only) = {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.dirty = false;
            inner.version += 1;
            inner.bound_value = None;
            (
                inner.links.iter().filter_map(Weak::upgrade).collect::<Vec<_>>(),
                inner.observers.iter().cloned().collect::<Vec<_>>(),
                inner.children.values().cloned().collect::<Vec<_>>(),
                inner.read_only,
            )
        };
        for link in links {
            link.borrow_mut().dirty = true;
        }
        for observer in &observers {
            observer.update();
        }
        for child in &children {
            child.handle_change();
        }

        if let Some(store) = root.as_ref().and_then(|r| r.inner.borrow().store.upgrade()) {
            store.changed(&self.keypath());
        }

        if read_only {
            return;
        }
        let mut source = self.inner.borrow().parent.upgrade();
        while let Some(candidate) = source.take() {
            if !candidate.can_shuffle() {
                source = Some(candidate);
                break;
            }
            source = candidate.parent();
        }
        if let Some(Ancestor::Computation(computation)) = source {
            computation.push_to_sources();
        }
    }

    /// Re-key index children after the collection this node addresses was
    /// reordered.
    ///
    /// `new_indices[i]` is the new position of the item previously at `i`,
    /// or `None` if it was removed. Index children beyond the mapping and
    /// named children keep their keys. The subtree is then marked changed.
    pub fn shuffle(&self, new_indices: &[Option<usize>]) {
        {
            let mut inner = self.inner.borrow_mut();
            let previous = std::mem::take(&mut inner.children);
            for (key, child) in previous {
                let target = if is_index(&key) {
                    match key.parse::<usize>().ok().and_then(|i| new_indices.get(i)) {
                        Some(Some(new_index)) => Some(new_index.to_string()),
                        Some(None) => None,
                        None => Some(key),
                    }
                } else {
                    Some(key)
                };
                if let Some(target) = target {
                    child.inner.borrow_mut().key.clone_from(&target);
                    inner.children.insert(target, child);
                }
            }
        }
        self.handle_change();
    }

    /// The computation root and the segments from it down to this node.
    fn lineage(&self) -> (Option<Computation>, Vec<String>) {
        let mut segments = vec![self.key()];
        let mut parent = self.inner.borrow().parent.upgrade();
        loop {
            match parent {
                Some(Ancestor::Node(node)) => {
                    segments.push(node.key());
                    parent = node.inner.borrow().parent.upgrade();
                }
                Some(Ancestor::Computation(root)) => {
                    segments.reverse();
                    return (Some(root), segments);
                }
                None => {
                    segments.reverse();
                    return (None, segments);
                }
            }
        }
    }
}
