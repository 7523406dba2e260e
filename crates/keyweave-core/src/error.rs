#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The one surfaced failure: a wildcard in a DOM-event name.
///
/// Everything else in keyweave is fail-soft: unresolved references,
/// missing keypaths, and unknown observers are reported as `None`/`false`,
/// never as errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(
        "only component proxy-events may contain \"*\" wildcards, <{owner} on-{name}=\"...\"/> is not valid"
    )]
    WildcardEventName { owner: String, name: String },
}

impl Error {
    #[must_use]
    pub fn wildcard(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::WildcardEventName {
            owner: owner.into(),
            name: name.into(),
        }
    }
}
