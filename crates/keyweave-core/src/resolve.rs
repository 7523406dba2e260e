#![forbid(unsafe_code)]

//! Resolution of template references against a context stack.
//!
//! A reference such as `name` or `item.label` is ambiguous until it is
//! matched against the contexts it appears in. [`resolve_reference`] walks
//! the stack from the innermost context outwards and picks the first
//! context whose value owns the reference's leaf key; the nearest enclosing
//! scope shadows outer ones. When no context matches, the reference is
//! tried as an absolute keypath. Anything else is unresolved and left to
//! the caller to retry after the model changes shape.

use crate::keypath::{IMPLICIT_ITERATOR, Keypath, SEPARATOR};
use crate::model::Gettable;

/// Resolve `reference` to an absolute keypath.
///
/// `context_stack` is ordered outermost first. It is only read.
///
/// Returns `None` when the reference cannot be resolved yet.
pub fn resolve_reference<M>(
    model: &M,
    reference: &str,
    context_stack: &[Keypath],
) -> Option<Keypath>
where
    M: Gettable + ?Sized,
{
    if reference == IMPLICIT_ITERATOR {
        return context_stack.last().cloned();
    }
    if reference.is_empty() {
        return None;
    }

    let (prefix, leaf) = match reference.rfind(SEPARATOR) {
        Some(idx) => (&reference[..idx], &reference[idx + 1..]),
        None => ("", reference),
    };

    for context in context_stack.iter().rev() {
        let parent = context.join(prefix);
        if model.owns_key(&parent, leaf) {
            return Some(context.join(reference));
        }
    }

    let absolute = Keypath::new(reference);
    model.is_defined(&absolute).then_some(absolute)
}
