//! Resolution results tagged with where they came from.
//!
//! Every internal lookup step returns a [`Resolved`] carrying the raw,
//! unprotected value. Only the public entry points call
//! [`Resolved::into_protected`], which wraps inherited containers so that a
//! caller can never mutate an ancestor through a value it was lent.

use metachain_path::{split_index, Rest};

use crate::config::LookupOptions;
use crate::scalar::ScalarStore;
use crate::sequence::SequenceStore;
use crate::value::Value;

/// Where a resolved value was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// In the queried store itself (or in containers it owns).
    Local,
    /// Somewhere along a defaults chain.
    Inherited,
}

impl Origin {
    /// Inherited if either hop was inherited.
    pub fn join(self, other: Origin) -> Origin {
        match (self, other) {
            (Origin::Local, Origin::Local) => Origin::Local,
            _ => Origin::Inherited,
        }
    }
}

/// A value paired with its [`Origin`].
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub origin: Origin,
}

impl Resolved {
    pub fn local(value: Value) -> Self {
        Self {
            value,
            origin: Origin::Local,
        }
    }

    /// Mark a result obtained through a defaults link.
    pub fn inherited(self) -> Self {
        Self {
            origin: Origin::Inherited,
            ..self
        }
    }

    /// Combine with the origin of the hop that led here.
    pub fn via(self, hop: Origin) -> Self {
        Self {
            origin: hop.join(self.origin),
            ..self
        }
    }

    /// Apply copy-on-read protection.
    ///
    /// An inherited container is replaced by a fresh, empty container of
    /// the same kind whose only default is the inherited one. Writes to the
    /// wrapper land in the wrapper; reads fall through to the ancestor.
    /// Local containers and all scalars are returned as they are.
    pub fn into_protected(self) -> Value {
        match (self.origin, self.value) {
            (Origin::Inherited, Value::Store(s)) => Value::Store(ScalarStore::with_defaults(s)),
            (Origin::Inherited, Value::Sequence(s)) => {
                Value::Sequence(SequenceStore::with_defaults(s))
            }
            (_, value) => value,
        }
    }
}

/// Continue a lookup inside `container` with the remainder of a key.
///
/// A name continues in a keyed store and an index in a sequence. An index
/// against anything that is not a sequence resolves only for `[0]`, which
/// denotes the value itself.
pub(crate) fn resolve_rest(
    container: &Value,
    rest: Rest<'_>,
    has_fallback: bool,
    opts: LookupOptions,
) -> Option<Resolved> {
    match (container, rest) {
        (Value::Store(store), Rest::Member(key)) => store.resolve(key, has_fallback, opts),
        (Value::Sequence(seq), Rest::Index(key)) => seq.resolve(key, has_fallback, opts),
        (Value::Sequence(_), Rest::Member(_)) => None,
        (other, Rest::Index(key)) => {
            let hop = split_index(key).ok()?;
            if hop.index != 0 {
                return None;
            }
            match hop.rest {
                None => Some(Resolved::local(other.clone())),
                Some(next) => resolve_rest(other, next, has_fallback, opts),
            }
        }
        _ => None,
    }
}
