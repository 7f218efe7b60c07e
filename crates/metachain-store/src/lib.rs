//! Prototype-chained metadata stores.
//!
//! This crate implements the property store used to describe datasets and
//! coordinate systems: named values and indexed lists of values that can
//! inherit unset entries from ancestor stores without copying them.
//!
//! # Store Types
//!
//! - [`ScalarStore`] -- keyed store with an optional defaults store
//! - [`SequenceStore`] -- indexed store whose holes read through to a
//!   defaults sequence
//! - [`Value`] -- what a slot holds: a [`Scalar`], a nested store or
//!   sequence, or a deferred [`LazyValue`]
//!
//! # Design Rules
//!
//! 1. Unset entries read through the defaults chain, one link per store.
//! 2. Compound keys (`"Axes[1].name"`) resolve hop by hop; see
//!    [`metachain_path`].
//! 3. A container reached through a defaults link is never handed out
//!    directly. Callers get a fresh wrapper whose sole default is the
//!    inherited container, so writes never leak into an ancestor.
//! 4. Registered procedures run on first demand and their `Ok` results are
//!    memoized locally.
//! 5. Wrong-typed values are reported as [`MetaError::TypeMismatch`], never
//!    silently treated as absent.

pub mod config;
pub mod envelope;
pub mod error;
pub mod json;
pub mod scalar;
pub mod schema;
pub mod sequence;
pub mod value;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{Growth, LookupOptions, StoreConfig};
pub use envelope::{Origin, Resolved};
pub use error::{MetaError, MetaResult};
pub use scalar::{ScalarStore, COMPUTED_SUFFIX};
pub use schema::{Schema, SchemaRules, SCHEMA_KEY, SCHEMA_VERSION_KEY};
pub use sequence::SequenceStore;
pub use value::{FromValue, Kind, LazyValue, Opaque, Scalar, Value};

pub use metachain_lazy::{LazyProcedure, ProcedureError, ProcedureStatus};
