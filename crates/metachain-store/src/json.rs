//! Building stores from JSON documents, and rendering them back for display.
//!
//! Import is a convenience for fixtures and tools; it is not a storage
//! format. Objects become [`ScalarStore`]s, arrays become
//! [`SequenceStore`]s, and `null` array elements become holes.

use serde_json::{Map, Number, Value as Json};

use crate::error::MetaResult;
use crate::scalar::ScalarStore;
use crate::sequence::SequenceStore;
use crate::value::{Scalar, Value};

/// Nesting depth beyond which [`Value::to_json`] stops descending.
pub const MAX_RENDER_DEPTH: usize = 64;

impl Value {
    /// Convert a JSON document into a value tree.
    pub fn from_json(json: Json) -> MetaResult<Value> {
        Ok(match json {
            Json::Null => Value::Scalar(Scalar::Null),
            Json::Bool(b) => Value::from(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::from(i),
                None => Value::from(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::from(s),
            Json::Array(items) => {
                let seq = SequenceStore::new();
                seq.set_size(items.len())?;
                for (index, item) in items.into_iter().enumerate() {
                    if !item.is_null() {
                        seq.set_element_at(Value::from_json(item)?, index)?;
                    }
                }
                Value::Sequence(seq)
            }
            Json::Object(fields) => {
                let store = ScalarStore::new();
                for (key, item) in fields {
                    store.put(key, Value::from_json(item)?)?;
                }
                Value::Store(store)
            }
        })
    }

    /// Render the value as JSON, resolving through defaults chains.
    ///
    /// Procedures that have not produced a value render as `"<computed>"`,
    /// opaque objects as `"<opaque>"`.
    pub fn to_json(&self) -> Json {
        self.render(0)
    }

    fn render(&self, depth: usize) -> Json {
        if depth > MAX_RENDER_DEPTH {
            return Json::String("<...>".into());
        }
        match self {
            Value::Scalar(Scalar::Null) => Json::Null,
            Value::Scalar(Scalar::Bool(b)) => Json::Bool(*b),
            Value::Scalar(Scalar::Int(n)) => Json::from(*n),
            Value::Scalar(Scalar::Float(x)) => {
                Number::from_f64(*x).map_or(Json::Null, Json::Number)
            }
            Value::Scalar(Scalar::Text(s)) => Json::String(s.clone()),
            Value::Scalar(Scalar::Opaque(_)) => Json::String("<opaque>".into()),
            Value::Lazy(_) => Json::String("<computed>".into()),
            Value::Sequence(seq) => Json::Array(
                seq.to_vec()
                    .into_iter()
                    .map(|item| item.map_or(Json::Null, |v| v.render(depth + 1)))
                    .collect(),
            ),
            Value::Store(store) => {
                let mut fields = Map::new();
                for name in store.metadatum_names() {
                    let key = metachain_path::escape_name(&name);
                    let rendered = store
                        .get(&key)
                        .map_or_else(|| Json::String("<computed>".into()), |v| v.render(depth + 1));
                    fields.insert(name, rendered);
                }
                Json::Object(fields)
            }
        }
    }
}
