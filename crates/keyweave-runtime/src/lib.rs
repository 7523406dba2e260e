#![forbid(unsafe_code)]

//! Keypath dependency graph for reactive data binding.
//!
//! A [`Store`] holds a data tree addressed by [`Keypath`]s. Observers
//! register interest in keypaths; writes invalidate the cached values at and
//! below the written keypath and notify every affected observer. Derived
//! values are expressed as [`Computation`]s, whose dependencies are captured
//! automatically from the reads their getters perform.
//!
//! # Invariants
//!
//! 1. After any write, no cache entry at or below the written keypath, or
//!    at any of its ancestors, survives.
//! 2. Every observer of an affected keypath is updated exactly once per
//!    write, lower [`Priority`] tiers first, registration order within a
//!    tier.
//! 3. A computation never recomputes until read, and recomputes at most once
//!    per dependency change.
//! 4. Observers, getters, and setters may re-enter the store freely.
//!
//! [`Keypath`]: keyweave_core::Keypath

pub mod arrays;
pub mod cache;
pub mod capture;
pub mod computation;
pub mod config;
pub mod deps;
pub mod observer;
pub mod pending;
pub mod store;

pub use arrays::ArrayTracker;
pub use cache::ValueCache;
pub use capture::CaptureScope;
pub use computation::{Computation, ComputationNode};
pub use config::StoreConfig;
pub use deps::{DependencyRegistry, Priority};
pub use observer::{Observer, ObserverHandle};
pub use pending::{PendingRegistry, ResolveRequest};
pub use store::{Store, WeakStore};
