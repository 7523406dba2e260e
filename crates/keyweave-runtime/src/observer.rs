#![forbid(unsafe_code)]

//! Observer capability and identity handles.
//!
//! An observer is anything that can be told "something you depend on
//! changed". Registries store [`ObserverHandle`]s, which compare and hash by
//! the address of the shared allocation, so registering the same observer
//! twice is detectable and removal is by identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use keyweave_core::Keypath;

/// Receiver of change notifications.
pub trait Observer {
    /// A keypath this observer depends on changed.
    fn update(&self);

    /// A reference this observer was waiting on resolved to `keypath`.
    ///
    /// Defaults to [`update`](Observer::update).
    fn resolved(&self, keypath: &Keypath) {
        let _ = keypath;
        self.update();
    }
}

impl<F: Fn()> Observer for F {
    fn update(&self) {
        self()
    }
}

/// Shared, identity-compared reference to an [`Observer`].
#[derive(Clone)]
pub struct ObserverHandle(Rc<dyn Observer>);

impl ObserverHandle {
    /// Wrap an observer in a new allocation (a new identity).
    pub fn new<O: Observer + 'static>(observer: O) -> Self {
        Self(Rc::new(observer))
    }

    /// Wrap an existing shared observer, keeping its identity.
    #[must_use]
    pub fn from_rc(observer: Rc<dyn Observer>) -> Self {
        Self(observer)
    }

    /// Identity handle for a closure.
    pub fn from_fn(f: impl Fn() + 'static) -> Self {
        Self::new(f)
    }

    pub fn update(&self) {
        self.0.update();
    }

    pub fn resolved(&self, keypath: &Keypath) {
        self.0.resolved(keypath);
    }

    /// Whether two handles refer to the same observer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for ObserverHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObserverHandle {}

impl Hash for ObserverHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObserverHandle").field(&self.addr()).finish()
    }
}
