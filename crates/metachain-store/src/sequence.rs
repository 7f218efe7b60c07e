//! Indexed metadata store with a defaults chain.
//!
//! [`SequenceStore`] is the indexed counterpart of
//! [`ScalarStore`](crate::ScalarStore): an ordered list of values with a
//! logical size, whose unset slots ("holes") read through to the same index
//! of a defaults sequence.
//!
//! # Invariants
//!
//! - `size() >= default_size()` at all times. The logical size is never
//!   smaller than the defaults' size, even if the defaults grow after
//!   attachment.
//! - `capacity() >= size()`.
//! - Indices below `default_size()` form the protected region: removing
//!   there erases to a hole, inserting there is refused.
//! - Inherited containers are handed out wrapped, as for keyed stores.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metachain_path::split_index;
use tracing::debug;

use crate::config::{Growth, LookupOptions, StoreConfig};
use crate::envelope::{resolve_rest, Resolved};
use crate::error::{MetaError, MetaResult};
use crate::scalar::ScalarStore;
use crate::value::{CloneMemo, FromValue, Value};

struct State {
    /// Backing storage. `None` is a hole. Slots at or beyond `size` are
    /// always holes.
    slots: Vec<Option<Value>>,
    /// Logical size as last written; see [`State::floor`].
    size: usize,
    growth: Growth,
    defaults: Option<SequenceStore>,
}

impl State {
    fn default_size(&self) -> usize {
        self.defaults.as_ref().map_or(0, SequenceStore::size)
    }

    /// Raise the stored size to the defaults' current size.
    fn floor(&mut self) -> usize {
        let floor = self.default_size();
        if self.size < floor {
            self.size = floor;
        }
        floor
    }

    fn size(&self) -> usize {
        self.size.max(self.default_size())
    }

    fn capacity(&self) -> usize {
        self.slots.len().max(self.size())
    }

    fn slot(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn ensure_capacity(&mut self, required: usize) -> MetaResult<()> {
        let current = self.slots.len();
        if current >= required {
            return Ok(());
        }
        let target = self.growth.next_capacity(current, required);
        self.slots
            .try_reserve_exact(target - current)
            .map_err(|e| MetaError::InvalidArgument(format!("cannot grow to {target}: {e}")))?;
        self.slots.resize(target, None);
        Ok(())
    }

    /// Erase slots from `from` to the end of the backing storage.
    fn clear_from(&mut self, from: usize) {
        for slot in self.slots.iter_mut().skip(from) {
            *slot = None;
        }
    }
}

/// A shared handle to an indexed metadata store.
///
/// Cloning the handle aliases the sequence.
#[derive(Clone)]
pub struct SequenceStore {
    inner: Arc<RwLock<State>>,
}

impl SequenceStore {
    fn build(state: State) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty sequence with the default capacity and growth.
    pub fn new() -> Self {
        let config = StoreConfig::default();
        Self::build(State {
            slots: vec![None; config.initial_capacity],
            size: 0,
            growth: config.growth,
            defaults: None,
        })
    }

    /// Create an empty sequence with explicit capacity and growth policy.
    pub fn with_capacity(capacity: usize, growth: Growth) -> MetaResult<Self> {
        let growth = growth.validate()?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|e| MetaError::InvalidArgument(format!("capacity {capacity}: {e}")))?;
        slots.resize(capacity, None);
        Ok(Self::build(State {
            slots,
            size: 0,
            growth,
            defaults: None,
        }))
    }

    pub fn with_config(config: &StoreConfig) -> MetaResult<Self> {
        Self::with_capacity(config.initial_capacity, config.growth)
    }

    /// Create a sequence of holes over `defaults`.
    ///
    /// Backing storage is allocated on first write.
    pub fn with_defaults(defaults: SequenceStore) -> Self {
        let size = defaults.size();
        Self::build(State {
            slots: Vec::new(),
            size,
            growth: Growth::Doubling,
            defaults: Some(defaults),
        })
    }

    /// `true` if both handles refer to the same sequence.
    pub fn ptr_eq(&self, other: &SequenceStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------------------------------------------------------
    // Size and capacity
    // ---------------------------------------------------------------

    /// Logical size, never less than [`default_size`](Self::default_size).
    pub fn size(&self) -> usize {
        self.read().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Size of the defaults sequence, or zero.
    pub fn default_size(&self) -> usize {
        self.read().default_size()
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity()
    }

    pub fn growth(&self) -> Growth {
        self.read().growth
    }

    /// Shrink backing storage to the logical size.
    pub fn trim_to_size(&self) {
        let mut state = self.write();
        state.floor();
        let size = state.size;
        state.slots.truncate(size);
        state.slots.shrink_to_fit();
    }

    /// Make room for at least `capacity` slots.
    pub fn ensure_capacity(&self, capacity: usize) -> MetaResult<()> {
        self.write().ensure_capacity(capacity)
    }

    /// Set the logical size, never below the defaults' size.
    ///
    /// Growing appends holes; shrinking discards local values past the new
    /// end. Returns the size actually set.
    pub fn set_size(&self, size: usize) -> MetaResult<usize> {
        let mut state = self.write();
        let floor = state.floor();
        let size = size.max(floor);
        if size > state.size {
            state.ensure_capacity(size)?;
        } else {
            state.clear_from(size);
        }
        state.size = size;
        Ok(size)
    }

    // ---------------------------------------------------------------
    // Element access
    // ---------------------------------------------------------------

    /// Resolve the element at `index`, reading holes through the defaults.
    pub fn element_at(&self, index: usize) -> Option<Value> {
        self.resolve_index(index).map(Resolved::into_protected)
    }

    /// Like [`element_at`](Self::element_at) with a fallback.
    ///
    /// Unlike keyed lookups, the fallback never short-circuits the
    /// defaults chain.
    pub fn element_at_or(&self, index: usize, fallback: impl Into<Value>) -> Value {
        self.element_at(index).unwrap_or_else(|| fallback.into())
    }

    /// Resolve without protection, reporting where the value came from.
    pub fn resolve_index(&self, index: usize) -> Option<Resolved> {
        let defaults = {
            let state = self.read();
            if index >= state.size() {
                return None;
            }
            if let Some(value) = state.slot(index) {
                return Some(Resolved::local(value.clone()));
            }
            state.defaults.clone()?
        };
        defaults.resolve_index(index).map(Resolved::inherited)
    }

    /// Resolve a compound key beginning with an index, such as
    /// `"[1].name"`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_with(key, None, LookupOptions::default())
    }

    pub fn get_or(&self, key: &str, fallback: impl Into<Value>) -> Value {
        let fallback = fallback.into();
        self.get_with(key, Some(fallback.clone()), LookupOptions::default())
            .unwrap_or(fallback)
    }

    pub fn get_with(
        &self,
        key: &str,
        fallback: Option<Value>,
        opts: LookupOptions,
    ) -> Option<Value> {
        match self.resolve(key, fallback.is_some(), opts) {
            Some(found) => Some(found.into_protected()),
            None => fallback,
        }
    }

    /// Unprotected resolution of an index-first compound key.
    pub fn resolve(&self, key: &str, has_fallback: bool, opts: LookupOptions) -> Option<Resolved> {
        let hop = split_index(key).ok()?;
        let found = self.resolve_index(hop.index)?;
        match hop.rest {
            None => Some(found),
            Some(rest) => {
                let origin = found.origin;
                resolve_rest(&found.value, rest, has_fallback, opts).map(|r| r.via(origin))
            }
        }
    }

    /// Resolve the element at `index` and convert it.
    pub fn element_as<T: FromValue>(&self, index: usize) -> MetaResult<Option<T>> {
        match self.element_at(index) {
            None => Ok(None),
            Some(value) => T::from_value(&value).map(Some).ok_or_else(|| MetaError::TypeMismatch {
                key: format!("[{index}]"),
                expected: T::KIND,
                found: value.kind(),
            }),
        }
    }

    /// Resolve an index-first compound key and convert it.
    pub fn get_as<T: FromValue>(&self, key: &str) -> MetaResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => T::from_value(&value).map(Some).ok_or_else(|| MetaError::TypeMismatch {
                key: key.to_string(),
                expected: T::KIND,
                found: value.kind(),
            }),
        }
    }

    pub fn get_bool(&self, key: &str) -> MetaResult<Option<bool>> {
        self.get_as(key)
    }

    pub fn get_int(&self, key: &str) -> MetaResult<Option<i64>> {
        self.get_as(key)
    }

    /// Integers are widened.
    pub fn get_float(&self, key: &str) -> MetaResult<Option<f64>> {
        self.get_as(key)
    }

    pub fn get_text(&self, key: &str) -> MetaResult<Option<String>> {
        self.get_as(key)
    }

    pub fn get_store(&self, key: &str) -> MetaResult<Option<ScalarStore>> {
        self.get_as(key)
    }

    pub fn get_sequence(&self, key: &str) -> MetaResult<Option<SequenceStore>> {
        self.get_as(key)
    }

    pub fn first(&self) -> Option<Value> {
        self.element_at(0)
    }

    pub fn last(&self) -> Option<Value> {
        self.size().checked_sub(1).and_then(|i| self.element_at(i))
    }

    /// `true` if `index` is within the logical size but has no local value.
    pub fn is_hole(&self, index: usize) -> bool {
        let state = self.read();
        index < state.size() && state.slot(index).is_none()
    }

    /// Every element, resolved. Holes the defaults cannot fill are `None`.
    pub fn to_vec(&self) -> Vec<Option<Value>> {
        (0..self.size()).map(|i| self.element_at(i)).collect()
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Write `value` at `index`, growing the sequence if needed. Returns the
    /// previous local value.
    pub fn set_element_at(
        &self,
        value: impl Into<Value>,
        index: usize,
    ) -> MetaResult<Option<Value>> {
        let mut state = self.write();
        state.floor();
        let required = index
            .checked_add(1)
            .ok_or_else(|| MetaError::InvalidArgument(format!("index {index} too large")))?;
        state.ensure_capacity(required)?;
        if required > state.size {
            state.size = required;
        }
        Ok(state.slots[index].replace(value.into()))
    }

    /// Append `value` (addElement).
    pub fn push(&self, value: impl Into<Value>) -> MetaResult<usize> {
        let mut state = self.write();
        state.floor();
        let index = state.size;
        state.ensure_capacity(index + 1)?;
        state.slots[index] = Some(value.into());
        state.size = index + 1;
        Ok(index)
    }

    /// Remove the element at `index`.
    ///
    /// Within the protected region the slot is erased to a hole and `false`
    /// is returned; the size is unchanged and the index reads through to
    /// the defaults again. Above it, later elements shift down and the size
    /// shrinks by one.
    pub fn remove_element_at(&self, index: usize) -> MetaResult<bool> {
        let mut state = self.write();
        let floor = state.floor();
        if index >= state.size {
            return Err(MetaError::IndexOutOfRange {
                index,
                size: state.size,
            });
        }
        if index < floor {
            if let Some(slot) = state.slots.get_mut(index) {
                *slot = None;
            }
            debug!(index, floor, "erased protected sequence slot");
            return Ok(false);
        }
        if index < state.slots.len() {
            state.slots.remove(index);
            state.slots.push(None);
        }
        state.size -= 1;
        Ok(true)
    }

    /// Insert `value` at `index`, shifting later elements up.
    ///
    /// Refused (returning `false`) inside the protected region.
    pub fn insert_element_at(&self, value: impl Into<Value>, index: usize) -> MetaResult<bool> {
        let mut state = self.write();
        let floor = state.floor();
        if index > state.size {
            return Err(MetaError::IndexOutOfRange {
                index,
                size: state.size,
            });
        }
        if index < floor {
            debug!(index, floor, "refused insert into protected sequence region");
            return Ok(false);
        }
        let size = state.size;
        state.ensure_capacity(size + 1)?;
        state.slots.insert(index, Some(value.into()));
        // The displaced tail slot is past the logical end and so a hole.
        state.slots.pop();
        state.size = size + 1;
        Ok(true)
    }

    /// Remove every local value (removeAllElements). The size falls back to
    /// the defaults' size.
    pub fn clear(&self) {
        let mut state = self.write();
        state.clear_from(0);
        state.size = 0;
    }

    // ---------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------

    /// Value used when searching: the local slot, or the inherited value
    /// at the same index.
    fn search_value(&self, index: usize) -> Option<Value> {
        self.resolve_index(index).map(|found| found.value)
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.index_of_from(value, 0)
    }

    /// First index at or after `start` holding `value`.
    pub fn index_of_from(&self, value: &Value, start: usize) -> Option<usize> {
        (start..self.size()).find(|&i| self.search_value(i).as_ref() == Some(value))
    }

    pub fn last_index_of(&self, value: &Value) -> Option<usize> {
        let size = self.size();
        if size == 0 {
            return None;
        }
        self.last_index_of_from(value, size - 1)
    }

    /// Last index at or before `start` holding `value`.
    pub fn last_index_of_from(&self, value: &Value, start: usize) -> Option<usize> {
        let end = start.checked_add(1)?.min(self.size());
        (0..end)
            .rev()
            .find(|&i| self.search_value(i).as_ref() == Some(value))
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    // ---------------------------------------------------------------
    // Defaults chain
    // ---------------------------------------------------------------

    pub fn defaults(&self) -> Option<SequenceStore> {
        self.read().defaults.clone()
    }

    /// `true` if `other` is this sequence or one of its ancestors.
    pub fn chain_contains(&self, other: &SequenceStore) -> bool {
        let mut current = Some(self.clone());
        while let Some(seq) = current {
            if seq.ptr_eq(other) {
                return true;
            }
            current = seq.defaults();
        }
        false
    }

    /// Replace the defaults link, returning the previous one.
    ///
    /// Detaching (`None`) shrinks the size to just past the last local
    /// value. Attaching grows it to the larger of the current capacity and
    /// the new defaults' size.
    pub fn set_defaults(
        &self,
        defaults: Option<SequenceStore>,
    ) -> MetaResult<Option<SequenceStore>> {
        if let Some(candidate) = &defaults {
            if candidate.chain_contains(self) {
                return Err(MetaError::CyclicDefaults);
            }
        }
        let mut state = self.write();
        let size = match &defaults {
            None => {
                let limit = state.size().min(state.slots.len());
                state.slots[..limit]
                    .iter()
                    .rposition(Option::is_some)
                    .map_or(0, |i| i + 1)
            }
            Some(d) => state.capacity().max(d.size()),
        };
        debug!(attached = defaults.is_some(), size, "reparented sequence");
        state.clear_from(size);
        state.size = size;
        Ok(std::mem::replace(&mut state.defaults, defaults))
    }

    /// Replace the defaults with a deep copy of their current contents.
    pub fn detach(&self) {
        let Some(current) = self.defaults() else {
            return;
        };
        let copy = current.deep_clone();
        self.write().defaults = Some(copy);
        debug!("detached sequence from defaults chain");
    }

    // ---------------------------------------------------------------
    // Copies
    // ---------------------------------------------------------------

    /// A new sequence with the same local slots and defaults link. Nested
    /// containers are shared.
    pub fn clone_shallow(&self) -> SequenceStore {
        let state = self.read();
        Self::build(State {
            slots: state.slots.clone(),
            size: state.size,
            growth: state.growth,
            defaults: state.defaults.clone(),
        })
    }

    /// A fully independent copy, including the defaults chain.
    ///
    /// A container reached more than once is copied once, so shared and
    /// self-referencing structure is reproduced in the copy.
    pub fn deep_clone(&self) -> SequenceStore {
        self.deep_clone_with(&mut CloneMemo::default())
    }

    pub(crate) fn deep_clone_with(&self, memo: &mut CloneMemo) -> SequenceStore {
        let identity = Arc::as_ptr(&self.inner).cast::<()>();
        if let Some(copy) = memo.sequences.get(&identity) {
            return copy.clone();
        }
        let (slots, size, growth, defaults) = {
            let state = self.read();
            (state.slots.clone(), state.size, state.growth, state.defaults.clone())
        };
        let copy = Self::build(State {
            slots: Vec::new(),
            size,
            growth,
            defaults: None,
        });
        memo.sequences.insert(identity, copy.clone());

        let slots: Vec<Option<Value>> = slots
            .into_iter()
            .map(|slot| slot.map(|value| value.deep_clone_with(memo)))
            .collect();
        let defaults = defaults.map(|d| d.deep_clone_with(memo));
        let mut state = copy.write();
        state.slots = slots;
        state.defaults = defaults;
        drop(state);
        copy
    }
}

impl Default for SequenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SequenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("SequenceStore")
            .field("size", &state.size())
            .field("capacity", &state.capacity())
            .field("has_defaults", &state.defaults.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Kind;
    use proptest::prelude::*;

    fn seq_of(values: &[i64]) -> SequenceStore {
        let s = SequenceStore::new();
        for v in values {
            s.push(*v).unwrap();
        }
        s
    }

    fn ints(s: &SequenceStore) -> Vec<Option<i64>> {
        s.to_vec()
            .into_iter()
            .map(|v| v.and_then(|v| v.as_int()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Size and capacity
    // -----------------------------------------------------------------------

    #[test]
    fn new_sequence_is_empty() {
        let s = SequenceStore::new();
        assert_eq!(s.size(), 0);
        assert!(s.is_empty());
        assert_eq!(s.capacity(), 10);
        assert_eq!(s.default_size(), 0);
        assert_eq!(s.first(), None);
        assert_eq!(s.last(), None);
    }

    #[test]
    fn zero_fixed_growth_is_invalid() {
        assert!(matches!(
            SequenceStore::with_capacity(4, Growth::Fixed(0)),
            Err(MetaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn fixed_growth_steps() {
        let s = SequenceStore::with_capacity(2, Growth::Fixed(3)).unwrap();
        s.push(1).unwrap();
        s.push(2).unwrap();
        s.push(3).unwrap();
        assert_eq!(s.capacity(), 5);
        assert_eq!(s.growth(), Growth::Fixed(3));
    }

    #[test]
    fn doubling_growth() {
        let s = SequenceStore::with_capacity(2, Growth::Doubling).unwrap();
        for i in 0..3 {
            s.push(i).unwrap();
        }
        assert_eq!(s.capacity(), 4);
    }

    #[test]
    fn trim_to_size() {
        let s = seq_of(&[1, 2, 3]);
        assert_eq!(s.capacity(), 10);
        s.trim_to_size();
        assert_eq!(s.capacity(), 3);
        assert_eq!(ints(&s), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn set_size_grows_with_holes_and_shrinks() {
        let s = seq_of(&[1, 2]);
        assert_eq!(s.set_size(4).unwrap(), 4);
        assert_eq!(ints(&s), vec![Some(1), Some(2), None, None]);
        assert!(s.is_hole(3));

        assert_eq!(s.set_size(1).unwrap(), 1);
        assert_eq!(ints(&s), vec![Some(1)]);
        // Values past a shrink do not reappear.
        s.set_size(2).unwrap();
        assert_eq!(ints(&s), vec![Some(1), None]);
    }

    #[test]
    fn set_size_clamps_to_default_size() {
        let base = seq_of(&[1, 2, 3]);
        let s = SequenceStore::with_defaults(base);
        assert_eq!(s.set_size(1).unwrap(), 3);
        assert_eq!(s.size(), 3);
    }

    #[test]
    fn size_follows_growing_defaults() {
        let base = seq_of(&[1]);
        let s = SequenceStore::with_defaults(base.clone());
        base.push(2).unwrap();
        assert_eq!(s.size(), 2);
        assert_eq!(s.element_at(1), Some(Value::from(2)));
    }

    // -----------------------------------------------------------------------
    // Element access
    // -----------------------------------------------------------------------

    #[test]
    fn set_element_at_grows() {
        let s = SequenceStore::new();
        assert_eq!(s.set_element_at("x", 12).unwrap(), None);
        assert_eq!(s.size(), 13);
        assert!(s.capacity() >= 13);
        assert!(s.is_hole(0));
        assert_eq!(s.element_at(12), Some(Value::from("x")));
        assert_eq!(s.set_element_at("y", 12).unwrap(), Some(Value::from("x")));
    }

    #[test]
    fn holes_read_through_defaults() {
        let base = seq_of(&[10, 20, 30]);
        let s = SequenceStore::with_defaults(base);
        s.set_element_at(21, 1).unwrap();
        assert_eq!(ints(&s), vec![Some(10), Some(21), Some(30)]);
        assert_eq!(s.element_at(3), None);
        assert_eq!(s.element_at_or(3, -1), Value::from(-1));
    }

    #[test]
    fn element_fallback_does_not_skip_defaults() {
        let base = seq_of(&[10]);
        let s = SequenceStore::with_defaults(base);
        assert_eq!(s.element_at_or(0, -1), Value::from(10));
    }

    #[test]
    fn inherited_elements_are_wrapped() {
        let base = SequenceStore::new();
        let inner = ScalarStore::new();
        inner.put("name", "RA").unwrap();
        base.push(inner.clone()).unwrap();
        let s = SequenceStore::with_defaults(base.clone());

        let got = s.element_as::<ScalarStore>(0).unwrap().unwrap();
        assert!(!got.ptr_eq(&inner));
        got.put("name", "GLON").unwrap();
        assert_eq!(inner.get("name"), Some(Value::from("RA")));

        let direct = base.element_as::<ScalarStore>(0).unwrap().unwrap();
        assert!(direct.ptr_eq(&inner));
    }

    #[test]
    fn path_lookup_from_sequence() {
        let s = SequenceStore::new();
        let inner = ScalarStore::new();
        inner.put("name", "Dec").unwrap();
        s.push(1).unwrap();
        s.push(inner).unwrap();
        assert_eq!(s.get("[1].name"), Some(Value::from("Dec")));
        assert_eq!(s.get("[0]"), Some(Value::from(1)));
        assert_eq!(s.get("[5].name"), None);
        assert_eq!(s.get("name"), None);
        assert_eq!(s.get_or("[5].name", "?"), Value::from("?"));
        assert_eq!(s.get_as::<String>("[1].name").unwrap().as_deref(), Some("Dec"));
    }

    #[test]
    fn nested_sequences() {
        let grid = SequenceStore::new();
        grid.push(seq_of(&[1, 2])).unwrap();
        grid.push(seq_of(&[3, 4])).unwrap();
        assert_eq!(grid.get("[1][0]"), Some(Value::from(3)));
        assert_eq!(grid.get("[1][2]"), None);
    }

    #[test]
    fn element_as_mismatch() {
        let s = seq_of(&[1]);
        match s.element_as::<String>(0) {
            Err(MetaError::TypeMismatch { key, expected, found }) => {
                assert_eq!(key, "[0]");
                assert_eq!(expected, Kind::Text);
                assert_eq!(found, Kind::Int);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn typed_getters() {
        let s = SequenceStore::new();
        s.push(3).unwrap();
        s.push("RA").unwrap();
        s.push(ScalarStore::new()).unwrap();
        assert_eq!(s.get_int("[0]").unwrap(), Some(3));
        assert_eq!(s.get_float("[0]").unwrap(), Some(3.0));
        assert_eq!(s.get_text("[1]").unwrap(), Some("RA".to_string()));
        assert!(s.get_store("[2]").unwrap().is_some());
        assert_eq!(s.get_bool("[5]").unwrap(), None);
        assert!(matches!(
            s.get_sequence("[0]"),
            Err(MetaError::TypeMismatch { found: Kind::Int, .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Insert / remove
    // -----------------------------------------------------------------------

    #[test]
    fn remove_in_protected_region_erases() {
        let base = seq_of(&[10, 20]);
        let s = SequenceStore::with_defaults(base);
        s.set_element_at(11, 0).unwrap();
        assert_eq!(s.element_at(0), Some(Value::from(11)));

        assert!(!s.remove_element_at(0).unwrap());
        assert_eq!(s.size(), 2);
        assert_eq!(s.element_at(0), Some(Value::from(10)));
    }

    #[test]
    fn remove_above_protected_region_shifts() {
        let base = seq_of(&[10]);
        let s = SequenceStore::with_defaults(base);
        s.push(20).unwrap();
        s.push(30).unwrap();
        s.push(40).unwrap();
        assert!(s.remove_element_at(2).unwrap());
        assert_eq!(ints(&s), vec![Some(10), Some(20), Some(40)]);
    }

    #[test]
    fn remove_out_of_range() {
        let s = seq_of(&[1]);
        assert!(matches!(
            s.remove_element_at(1),
            Err(MetaError::IndexOutOfRange { index: 1, size: 1 })
        ));
    }

    #[test]
    fn insert_shifts_up() {
        let s = seq_of(&[1, 3]);
        assert!(s.insert_element_at(2, 1).unwrap());
        assert_eq!(ints(&s), vec![Some(1), Some(2), Some(3)]);
        assert!(s.insert_element_at(4, 3).unwrap());
        assert_eq!(s.last(), Some(Value::from(4)));
        assert!(matches!(
            s.insert_element_at(9, 9),
            Err(MetaError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn insert_into_protected_region_refused() {
        let base = seq_of(&[1, 2]);
        let s = SequenceStore::with_defaults(base);
        assert!(!s.insert_element_at(0, 0).unwrap());
        assert!(!s.insert_element_at(0, 1).unwrap());
        assert_eq!(s.size(), 2);
        assert!(s.insert_element_at(3, 2).unwrap());
        assert_eq!(ints(&s), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn insert_grows_past_capacity() {
        let s = SequenceStore::with_capacity(1, Growth::Fixed(1)).unwrap();
        s.push(2).unwrap();
        s.insert_element_at(1, 0).unwrap();
        s.insert_element_at(0, 0).unwrap();
        assert_eq!(ints(&s), vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn clear_keeps_defaults_visible() {
        let base = seq_of(&[1, 2]);
        let s = SequenceStore::with_defaults(base);
        s.set_element_at(9, 0).unwrap();
        s.push(3).unwrap();
        s.clear();
        assert_eq!(ints(&s), vec![Some(1), Some(2)]);
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    #[test]
    fn index_of_checks_holes_against_defaults() {
        let base = seq_of(&[5, 6, 5]);
        let s = SequenceStore::with_defaults(base);
        s.set_element_at(7, 1).unwrap();
        assert_eq!(s.index_of(&Value::from(5)), Some(0));
        assert_eq!(s.last_index_of(&Value::from(5)), Some(2));
        assert_eq!(s.index_of(&Value::from(7)), Some(1));
        assert_eq!(s.index_of(&Value::from(6)), None);
        assert_eq!(s.index_of_from(&Value::from(5), 1), Some(2));
        assert_eq!(s.last_index_of_from(&Value::from(5), 1), Some(0));
        assert!(s.contains(&Value::from(7)));
        assert_eq!(SequenceStore::new().last_index_of(&Value::from(1)), None);
    }

    #[test]
    fn index_of_finds_nan() {
        let s = SequenceStore::new();
        s.push(1.0).unwrap();
        s.push(f64::NAN).unwrap();
        assert_eq!(s.index_of(&Value::from(f64::NAN)), Some(1));
        assert_eq!(s.last_index_of(&Value::from(f64::NAN)), Some(1));
    }

    #[test]
    fn detach_preserves_aliasing_and_self_reference() {
        let shared = seq_of(&[1]);
        let base = SequenceStore::new();
        base.push(shared.clone()).unwrap();
        base.push(shared).unwrap();
        base.push(base.clone()).unwrap();
        let s = SequenceStore::with_defaults(base.clone());
        s.detach();

        let copy = s.defaults().unwrap();
        assert!(!copy.ptr_eq(&base));
        let first = copy.element_at(0).unwrap();
        assert!(first.ptr_eq(&copy.element_at(1).unwrap()));
        assert!(copy.element_at(2).unwrap().as_sequence().unwrap().ptr_eq(&copy));
        assert_eq!(s.get("[2][2][0][0]"), Some(Value::from(1)));
    }

    // -----------------------------------------------------------------------
    // Defaults chain
    // -----------------------------------------------------------------------

    #[test]
    fn dropping_defaults_shrinks_to_last_local() {
        let base = seq_of(&[1, 2, 3, 4]);
        let s = SequenceStore::with_defaults(base);
        s.set_element_at(9, 1).unwrap();
        s.set_defaults(None).unwrap();
        assert_eq!(s.size(), 2);
        assert_eq!(ints(&s), vec![None, Some(9)]);

        let bare = SequenceStore::with_defaults(seq_of(&[1]));
        bare.set_defaults(None).unwrap();
        assert_eq!(bare.size(), 0);
    }

    #[test]
    fn attaching_defaults_grows_size() {
        let s = SequenceStore::with_capacity(2, Growth::Doubling).unwrap();
        s.push(1).unwrap();
        let prev = s.set_defaults(Some(seq_of(&[7, 8, 9]))).unwrap();
        assert!(prev.is_none());
        assert_eq!(s.size(), 3);
        assert_eq!(ints(&s), vec![Some(1), Some(8), Some(9)]);
    }

    #[test]
    fn cyclic_defaults_rejected() {
        let a = SequenceStore::new();
        let b = SequenceStore::with_defaults(a.clone());
        assert!(matches!(
            a.set_defaults(Some(b)),
            Err(MetaError::CyclicDefaults)
        ));
    }

    #[test]
    fn detach_freezes_defaults() {
        let base = seq_of(&[1, 2]);
        let s = SequenceStore::with_defaults(base.clone());
        s.detach();
        base.set_element_at(100, 0).unwrap();
        base.push(3).unwrap();
        assert_eq!(ints(&s), vec![Some(1), Some(2)]);
    }

    #[test]
    fn clone_shallow_and_deep() {
        let inner = ScalarStore::new();
        let s = SequenceStore::new();
        s.push(inner.clone()).unwrap();

        let shallow = s.clone_shallow();
        assert!(shallow.element_as::<ScalarStore>(0).unwrap().unwrap().ptr_eq(&inner));
        shallow.push(1).unwrap();
        assert_eq!(s.size(), 1);

        let deep = s.deep_clone();
        assert!(!deep.element_as::<ScalarStore>(0).unwrap().unwrap().ptr_eq(&inner));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Op {
        Set(usize, i64),
        Push(i64),
        Insert(usize, i64),
        Remove(usize),
        Resize(usize),
        Clear,
        Trim,
        SetDefaults(Option<Vec<i64>>),
        Detach,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..12, any::<i64>()).prop_map(|(i, v)| Op::Set(i, v)),
            any::<i64>().prop_map(Op::Push),
            (0usize..12, any::<i64>()).prop_map(|(i, v)| Op::Insert(i, v)),
            (0usize..12).prop_map(Op::Remove),
            (0usize..12).prop_map(Op::Resize),
            Just(Op::Clear),
            Just(Op::Trim),
            proptest::option::of(proptest::collection::vec(any::<i64>(), 0..8))
                .prop_map(Op::SetDefaults),
            Just(Op::Detach),
        ]
    }

    proptest! {
        #[test]
        fn size_never_below_default_size(
            base in proptest::collection::vec(any::<i64>(), 0..6),
            ops in proptest::collection::vec(op(), 0..40),
        ) {
            let s = SequenceStore::with_defaults(seq_of(&base));
            for op in ops {
                let before = s.size();
                match op {
                    Op::Set(i, v) => { s.set_element_at(v, i).unwrap(); }
                    Op::Push(v) => { s.push(v).unwrap(); }
                    Op::Insert(i, v) => {
                        if let Ok(inserted) = s.insert_element_at(v, i) {
                            prop_assert_eq!(s.size(), if inserted { before + 1 } else { before });
                        }
                    }
                    Op::Remove(i) => {
                        if let Ok(removed) = s.remove_element_at(i) {
                            prop_assert_eq!(s.size(), if removed { before - 1 } else { before });
                        }
                    }
                    Op::Resize(n) => { s.set_size(n).unwrap(); }
                    Op::Clear => s.clear(),
                    Op::Trim => s.trim_to_size(),
                    Op::SetDefaults(values) => {
                        s.set_defaults(values.map(|v| seq_of(&v))).unwrap();
                    }
                    Op::Detach => s.detach(),
                }
                prop_assert!(s.size() >= s.default_size());
                prop_assert!(s.capacity() >= s.size());
            }
        }
    }
}
