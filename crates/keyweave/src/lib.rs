#![forbid(unsafe_code)]

//! keyweave public facade crate.
//!
//! ```
//! use keyweave::prelude::*;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let store = Store::new(Value::from(serde_json::json!({ "user": { "name": "Ann" } })));
//! let name = Keypath::new("user.name");
//!
//! let hits = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&hits);
//! store.register_dependant(
//!     &name,
//!     ObserverHandle::from_fn(move || counter.set(counter.get() + 1)),
//!     Priority::DISPLAY,
//! );
//!
//! store.set(&Keypath::new("user"), Value::from(serde_json::json!({ "name": "Bea" })));
//! assert_eq!(hits.get(), 1);
//! assert_eq!(store.get(&name), Value::from("Bea"));
//! ```

pub use keyweave_core::{Error, Keypath, Result, Value, resolve_reference};
#[cfg(feature = "runtime")]
pub use keyweave_runtime::{Computation, Store, StoreConfig};

pub mod prelude {
    pub use keyweave_core as core;
    pub use keyweave_core::{
        Array, EventName, Gettable, Keypath, Reference, Value, resolve_reference,
    };
    #[cfg(feature = "runtime")]
    pub use keyweave_runtime as runtime;
    #[cfg(feature = "runtime")]
    pub use keyweave_runtime::{
        Computation, ComputationNode, Observer, ObserverHandle, Priority, Store, StoreConfig,
    };
}
