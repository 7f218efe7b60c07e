//! Heterogeneous values held by stores.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use metachain_lazy::LazyProcedure;

use crate::scalar::ScalarStore;
use crate::sequence::SequenceStore;

/// A deferred value registered under a key.
pub type LazyValue = LazyProcedure<Value>;

/// An application object stored by reference.
///
/// Equality is pointer identity: two `Opaque`s are equal only if they
/// share one allocation.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opaque(..)")
    }
}

/// A non-container value.
///
/// Floats compare by bit pattern with every NaN equal to every other, so
/// a stored NaN is found again and `0.0` differs from `-0.0`.
#[derive(Clone, Debug)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Opaque(Opaque),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Opaque(a), Scalar::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

/// Type tag used in diagnostics and typed lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Opaque,
    Store,
    Sequence,
    Lazy,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Text => "text",
            Kind::Opaque => "opaque",
            Kind::Store => "store",
            Kind::Sequence => "sequence",
            Kind::Lazy => "lazy",
        };
        f.write_str(name)
    }
}

/// Anything a store slot can hold.
///
/// Containers and procedures are shared handles: cloning a `Value` never
/// copies a nested store. Equality is by value for scalars and by identity
/// for everything else.
#[derive(Clone, Debug)]
pub enum Value {
    Scalar(Scalar),
    Store(ScalarStore),
    Sequence(SequenceStore),
    Lazy(LazyValue),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Scalar(Scalar::Null) => Kind::Null,
            Value::Scalar(Scalar::Bool(_)) => Kind::Bool,
            Value::Scalar(Scalar::Int(_)) => Kind::Int,
            Value::Scalar(Scalar::Float(_)) => Kind::Float,
            Value::Scalar(Scalar::Text(_)) => Kind::Text,
            Value::Scalar(Scalar::Opaque(_)) => Kind::Opaque,
            Value::Store(_) => Kind::Store,
            Value::Sequence(_) => Kind::Sequence,
            Value::Lazy(_) => Kind::Lazy,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Store(_) | Value::Sequence(_))
    }

    pub fn as_store(&self) -> Option<&ScalarStore> {
        match self {
            Value::Store(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceStore> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Identity comparison, including for scalars' `Opaque` payloads.
    ///
    /// Plain scalars compare by value since they have no identity.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Store(a), Value::Store(b)) => a.ptr_eq(b),
            (Value::Sequence(a), Value::Sequence(b)) => a.ptr_eq(b),
            (Value::Lazy(a), Value::Lazy(b)) => a.ptr_eq(b),
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            _ => false,
        }
    }

    /// Recursively copy nested containers. Procedures stay shared.
    ///
    /// A container reached twice is copied once, so aliasing and cycles in
    /// the original carry over to the copy.
    pub fn deep_clone(&self) -> Value {
        self.deep_clone_with(&mut CloneMemo::default())
    }

    pub(crate) fn deep_clone_with(&self, memo: &mut CloneMemo) -> Value {
        match self {
            Value::Store(s) => Value::Store(s.deep_clone_with(memo)),
            Value::Sequence(s) => Value::Sequence(s.deep_clone_with(memo)),
            other => other.clone(),
        }
    }
}

/// Copies made so far during one deep clone, keyed by the original
/// container's allocation.
#[derive(Default)]
pub(crate) struct CloneMemo {
    pub(crate) stores: HashMap<*const (), ScalarStore>,
    pub(crate) sequences: HashMap<*const (), SequenceStore>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(Scalar::Int(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Scalar(Scalar::Int(n.into()))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(Scalar::Float(x))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::Text(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::Text(s))
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Scalar(Scalar::Opaque(o))
    }
}

impl From<ScalarStore> for Value {
    fn from(s: ScalarStore) -> Self {
        Value::Store(s)
    }
}

impl From<SequenceStore> for Value {
    fn from(s: SequenceStore) -> Self {
        Value::Sequence(s)
    }
}

impl From<LazyValue> for Value {
    fn from(p: LazyValue) -> Self {
        Value::Lazy(p)
    }
}

/// Conversion used by the typed accessors (`get_int`, `get_store`, ...).
pub trait FromValue: Sized {
    /// The kind reported in a type mismatch.
    const KIND: Kind;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const KIND: Kind = Kind::Bool;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const KIND: Kind = Kind::Int;
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl FromValue for f64 {
    const KIND: Kind = Kind::Float;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Scalar(Scalar::Float(x)) => Some(*x),
            Value::Scalar(Scalar::Int(n)) => Some(*n as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    const KIND: Kind = Kind::Text;
    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl FromValue for ScalarStore {
    const KIND: Kind = Kind::Store;
    fn from_value(value: &Value) -> Option<Self> {
        value.as_store().cloned()
    }
}

impl FromValue for SequenceStore {
    const KIND: Kind = Kind::Sequence;
    fn from_value(value: &Value) -> Option<Self> {
        value.as_sequence().cloned()
    }
}

impl FromValue for Opaque {
    const KIND: Kind = Kind::Opaque;
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Scalar(Scalar::Opaque(o)) => Some(o.clone()),
            _ => None,
        }
    }
}
