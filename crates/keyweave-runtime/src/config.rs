#![forbid(unsafe_code)]

//! Store configuration.
//!
//! Defaults can be overlaid from environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `KEYWEAVE_MODIFY_ARRAYS` | [`StoreConfig::modify_arrays`] |
//! | `KEYWEAVE_SYNC_COMPUTED` | [`StoreConfig::sync_computed_children`] |
//! | `KEYWEAVE_PRUNE_EMPTY` | [`StoreConfig::prune_empty_keypaths`] |
//!
//! Accepted values are `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`
//! (case-insensitive). Anything else leaves the field unchanged.

use std::env;

pub const ENV_MODIFY_ARRAYS: &str = "KEYWEAVE_MODIFY_ARRAYS";
pub const ENV_SYNC_COMPUTED: &str = "KEYWEAVE_SYNC_COMPUTED";
pub const ENV_PRUNE_EMPTY: &str = "KEYWEAVE_PRUNE_EMPTY";

/// Behaviour switches for a [`Store`](crate::Store).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Track arrays by identity so that mutating one notifies every keypath
    /// it is bound to.
    pub modify_arrays: bool,
    /// Make computation children writable: writes into a computed child are
    /// pushed back to the computation and its sources are re-checked.
    pub sync_computed_children: bool,
    /// Drop a keypath's registry entry once its last observer is removed.
    /// When `false` the empty entry is kept for reuse.
    pub prune_empty_keypaths: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            modify_arrays: false,
            sync_computed_children: false,
            prune_empty_keypaths: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn modify_arrays(mut self, enabled: bool) -> Self {
        self.modify_arrays = enabled;
        self
    }

    #[must_use]
    pub fn sync_computed_children(mut self, enabled: bool) -> Self {
        self.sync_computed_children = enabled;
        self
    }

    #[must_use]
    pub fn prune_empty_keypaths(mut self, enabled: bool) -> Self {
        self.prune_empty_keypaths = enabled;
        self
    }

    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay(|name| env::var(name).ok())
    }

    /// Overlay values produced by `lookup` (keyed by variable name).
    #[must_use]
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_MODIFY_ARRAYS)
            && let Some(flag) = parse_flag(&val)
        {
            self.modify_arrays = flag;
        }
        if let Some(val) = lookup(ENV_SYNC_COMPUTED)
            && let Some(flag) = parse_flag(&val)
        {
            self.sync_computed_children = flag;
        }
        if let Some(val) = lookup(ENV_PRUNE_EMPTY)
            && let Some(flag) = parse_flag(&val)
        {
            self.prune_empty_keypaths = flag;
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if ["1", "true", "yes", "on"]
        .iter()
        .any(|t| raw.eq_ignore_ascii_case(t))
    {
        Some(true)
    } else if ["0", "false", "no", "off"]
        .iter()
        .any(|f| raw.eq_ignore_ascii_case(f))
    {
        Some(false)
    } else {
        None
    }
}
