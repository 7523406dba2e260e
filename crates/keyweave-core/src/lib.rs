#![forbid(unsafe_code)]

//! Core types for keyweave: keypaths, value trees, and reference
//! resolution.
//!
//! This crate has no notion of observers or caches. It defines the address
//! space ([`Keypath`]), the data the addresses point into ([`Value`]), the
//! read capability the resolver works against ([`Gettable`]), and the
//! resolver itself ([`resolve_reference`]).

pub mod error;
pub mod event;
pub mod keypath;
pub mod model;
pub mod reference;
pub mod resolve;
pub mod value;

pub use error::{Error, Result};
pub use event::{EventName, EventTarget};
pub use keypath::{IMPLICIT_ITERATOR, Keypath};
pub use model::Gettable;
pub use reference::{Reference, SpecialRef, SpecialSource};
pub use resolve::resolve_reference;
pub use value::{Array, ArrayId, MAX_INDEX_GAP, Object, Value};
