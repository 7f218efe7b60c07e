//! Write-time interception for stores that follow a known schema.
//!
//! A store built with [`ScalarStore::with_schema`](crate::ScalarStore::with_schema)
//! passes every `put` through [`Schema::intercept`], which may coerce the
//! value to the type the schema expects for that key or refuse the write.
//! Lookups are unaffected.
//!
//! The keys [`SCHEMA_KEY`] and [`SCHEMA_VERSION_KEY`] are where stores
//! conventionally record which schema they follow. Nothing here reads or
//! validates them.

use std::collections::HashMap;
use std::fmt;

use crate::error::{MetaError, MetaResult};
use crate::value::{Kind, Scalar, Value};

/// Conventional key naming the schema a store follows.
pub const SCHEMA_KEY: &str = "schema";

/// Conventional key holding the schema's version.
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Hook consulted on every write to a schema-bound store.
pub trait Schema: Send + Sync + fmt::Debug {
    /// Schema name, suitable for storing under [`SCHEMA_KEY`].
    fn name(&self) -> &str;

    /// Schema version, suitable for storing under [`SCHEMA_VERSION_KEY`].
    fn version(&self) -> &str;

    /// Return the value to store under `key`, or refuse the write.
    ///
    /// `existing` is the current local value. Called with the store's
    /// entry lock held: implementations must not touch the store.
    fn intercept(&self, key: &str, value: Value, existing: Option<&Value>) -> MetaResult<Value>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Rule {
    kind: Option<Kind>,
    write_once: bool,
}

/// A table-driven [`Schema`].
///
/// Keys without a rule are stored unchanged.
///
/// ```
/// use std::sync::Arc;
/// use metachain_store::{Kind, ScalarStore, SchemaRules, Value};
///
/// let rules = SchemaRules::new("fits-header", "1.0")
///     .expect("NAXIS", Kind::Int)
///     .expect("CRVAL1", Kind::Float);
/// let header = ScalarStore::with_schema(Arc::new(rules));
///
/// header.put("NAXIS", "2").unwrap();
/// header.put("CRVAL1", 45).unwrap();
/// assert_eq!(header.get("NAXIS"), Some(Value::from(2)));
/// assert_eq!(header.get("CRVAL1"), Some(Value::from(45.0)));
/// assert!(header.put("NAXIS", "two").is_err());
/// ```
#[derive(Clone, Debug)]
pub struct SchemaRules {
    name: String,
    version: String,
    rules: HashMap<String, Rule>,
}

impl SchemaRules {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            rules: HashMap::new(),
        }
    }

    /// Require values under `key` to be of `kind`, coercing where possible.
    pub fn expect(mut self, key: impl Into<String>, kind: Kind) -> Self {
        self.rules.entry(key.into()).or_default().kind = Some(kind);
        self
    }

    /// Allow `key` to be written only while it has no local value.
    pub fn write_once(mut self, key: impl Into<String>) -> Self {
        self.rules.entry(key.into()).or_default().write_once = true;
        self
    }

    pub fn expected_kind(&self, key: &str) -> Option<Kind> {
        self.rules.get(key).and_then(|r| r.kind)
    }
}

/// Convert `value` to `kind` if there is an unambiguous conversion.
fn coerce(value: Value, kind: Kind) -> Result<Value, Value> {
    if value.kind() == kind {
        return Ok(value);
    }
    let scalar = match value {
        Value::Scalar(scalar) => scalar,
        other => return Err(other),
    };
    let converted = match (&scalar, kind) {
        (Scalar::Int(n), Kind::Float) => Some(Scalar::Float(*n as f64)),
        (Scalar::Text(t), Kind::Int) => t.trim().parse().ok().map(Scalar::Int),
        (Scalar::Text(t), Kind::Float) => t.trim().parse().ok().map(Scalar::Float),
        (Scalar::Text(t), Kind::Bool) => match t.trim() {
            "true" | "T" => Some(Scalar::Bool(true)),
            "false" | "F" => Some(Scalar::Bool(false)),
            _ => None,
        },
        (Scalar::Int(n), Kind::Text) => Some(Scalar::Text(n.to_string())),
        (Scalar::Float(x), Kind::Text) => Some(Scalar::Text(x.to_string())),
        (Scalar::Bool(b), Kind::Text) => Some(Scalar::Text(b.to_string())),
        _ => None,
    };
    converted.map(Value::Scalar).ok_or(Value::Scalar(scalar))
}

impl Schema for SchemaRules {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn intercept(&self, key: &str, value: Value, existing: Option<&Value>) -> MetaResult<Value> {
        let Some(rule) = self.rules.get(key) else {
            return Ok(value);
        };
        if rule.write_once && existing.is_some() {
            return Err(MetaError::WriteProtected {
                key: key.to_string(),
            });
        }
        match rule.kind {
            None => Ok(value),
            Some(kind) => coerce(value, kind).map_err(|rejected| MetaError::TypeMismatch {
                key: key.to_string(),
                expected: kind,
                found: rejected.kind(),
            }),
        }
    }
}
