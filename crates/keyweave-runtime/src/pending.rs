#![forbid(unsafe_code)]

//! Observers waiting for a reference to resolve.
//!
//! When a reference cannot be resolved yet (its key does not exist), the
//! owning observer parks itself here. If the observer is torn down first it
//! must be struck from the list with [`PendingRegistry::cancel`], so a late
//! resolution never fires against a destroyed observer.

use keyweave_core::Keypath;

use crate::observer::ObserverHandle;

/// A reference that can be retried against the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub reference: String,
    pub context: Vec<Keypath>,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    observer: ObserverHandle,
    request: Option<ResolveRequest>,
}

/// Ordered list of pending observers.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: Vec<PendingEntry>,
}

impl PendingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an observer that will retry on its own.
    pub fn register(&mut self, observer: ObserverHandle) {
        self.entries.push(PendingEntry {
            observer,
            request: None,
        });
    }

    /// Park an observer together with the reference it is waiting on.
    pub fn register_request(&mut self, observer: ObserverHandle, request: ResolveRequest) {
        self.entries.push(PendingEntry {
            observer,
            request: Some(request),
        });
    }

    /// Remove the first entry for `observer`. Returns whether one was found.
    pub fn cancel(&mut self, observer: &ObserverHandle) -> bool {
        match self.entries.iter().position(|e| e.observer == *observer) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, observer: &ObserverHandle) -> bool {
        self.entries.iter().any(|e| e.observer == *observer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of entries that carry a retryable request.
    #[must_use]
    pub fn requests(&self) -> Vec<(ObserverHandle, ResolveRequest)> {
        self.entries
            .iter()
            .filter_map(|e| e.request.clone().map(|r| (e.observer.clone(), r)))
            .collect()
    }

    /// Remove the first entry for `observer` whose request equals `request`.
    pub fn remove_request(&mut self, observer: &ObserverHandle, request: &ResolveRequest) -> bool {
        match self
            .entries
            .iter()
            .position(|e| e.observer == *observer && e.request.as_ref() == Some(request))
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }
}
