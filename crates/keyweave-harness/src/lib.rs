#![forbid(unsafe_code)]

//! Test harness and reference fixtures for keyweave.
//!
//! [`NotifyLog`] records, in order, every notification delivered to the
//! observers it hands out, so tests can assert on exact delivery counts and
//! ordering. The log renders as JSONL for postmortem diffs.

use std::cell::RefCell;
use std::rc::Rc;

use keyweave_core::{Keypath, Value};
use keyweave_runtime::{Observer, ObserverHandle, Priority, Store, StoreConfig};

/// One delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Update { label: String },
    Resolved { label: String, keypath: Keypath },
}

impl Delivery {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Update { label } | Self::Resolved { label, .. } => label,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Update { label } => serde_json::json!({ "event": "update", "label": label }),
            Self::Resolved { label, keypath } => serde_json::json!({
                "event": "resolved",
                "label": label,
                "keypath": keypath.as_str(),
            }),
        }
    }
}

/// Shared, ordered record of deliveries.
#[derive(Debug, Clone, Default)]
pub struct NotifyLog {
    entries: Rc<RefCell<Vec<Delivery>>>,
}

struct Recorder {
    label: String,
    log: NotifyLog,
}

impl Observer for Recorder {
    fn update(&self) {
        tracing::trace!(label = %self.label, "recorder updated");
        self.log.entries.borrow_mut().push(Delivery::Update {
            label: self.label.clone(),
        });
    }

    fn resolved(&self, keypath: &Keypath) {
        self.log.entries.borrow_mut().push(Delivery::Resolved {
            label: self.label.clone(),
            keypath: keypath.clone(),
        });
    }
}

impl NotifyLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh observer identity that records into this log under `label`.
    #[must_use]
    pub fn observer(&self, label: impl Into<String>) -> ObserverHandle {
        ObserverHandle::new(Recorder {
            label: label.into(),
            log: self.clone(),
        })
    }

    /// Labels of all deliveries so far, in order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|d| d.label().to_owned()).collect()
    }

    /// Number of deliveries recorded under `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.entries.borrow().iter().filter(|d| d.label() == label).count()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<Delivery> {
        self.entries.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// One JSON object per line.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        self.entries
            .borrow()
            .iter()
            .map(|d| d.to_json().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Store over a JSON document.
#[must_use]
pub fn json_store(data: serde_json::Value) -> Store {
    Store::new(Value::from(data))
}

/// Store over a JSON document with an explicit configuration.
#[must_use]
pub fn json_store_with(data: serde_json::Value, config: StoreConfig) -> Store {
    Store::with_config(Value::from(data), config)
}

/// Register a recording observer at `keypath` and return its handle.
pub fn watch(store: &Store, log: &NotifyLog, keypath: &str, priority: Priority) -> ObserverHandle {
    let observer = log.observer(keypath);
    store.register_dependant(&Keypath::new(keypath), observer.clone(), priority);
    observer
}

/// The user/address fixture used across scenarios.
#[must_use]
pub fn user_fixture() -> serde_json::Value {
    serde_json::json!({
        "user": {
            "name": "Ann",
            "address": { "city": "Oslo", "zip": "0150" }
        },
        "list": [
            { "name": "first" },
            { "name": "second" }
        ],
        "name": "top-level"
    })
}
