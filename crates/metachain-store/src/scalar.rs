//! Keyed metadata store with a defaults chain.
//!
//! [`ScalarStore`] maps names to [`Value`]s. A store may name another store
//! as its *defaults*; any key not set locally reads through to it, and so on
//! up the chain. Lookups accept compound keys (`"Axes[1].name"`) that reach
//! into nested stores and sequences in one call.
//!
//! # Invariants
//!
//! - A container found through the defaults chain is never handed out
//!   directly; callers receive a fresh, empty wrapper whose sole default is
//!   the inherited container.
//! - A container found locally is returned by reference.
//! - A memoized procedure result is written back only when the procedure
//!   finished with status `Ok`.
//! - The defaults chain is acyclic.
//!
//! # Locking
//!
//! Each store guards its own entries and its defaults link. Locks are held
//! per method, never across a whole chain traversal, so a lookup racing a
//! structural change elsewhere in the chain sees some interleaving of the
//! two. Procedure hooks run with no store lock held.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metachain_lazy::ProcedureStatus;
use metachain_path::split_name;
use tracing::debug;

use crate::config::{LookupOptions, StoreConfig};
use crate::envelope::{resolve_rest, Resolved};
use crate::error::{MetaError, MetaResult};
use crate::schema::Schema;
use crate::sequence::SequenceStore;
use crate::value::{CloneMemo, FromValue, LazyValue, Value};

/// Legacy suffix for registering a procedure under a derived key.
///
/// `put("K:computed", Value::Lazy(p))` registers `p` for `K`, exactly as
/// `put("K", Value::Lazy(p))` does.
pub const COMPUTED_SUFFIX: &str = ":computed";

#[derive(Clone, Default)]
struct Slot {
    value: Option<Value>,
    computed: Option<LazyValue>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.value.is_none() && self.computed.is_none()
    }
}

struct Inner {
    entries: RwLock<HashMap<String, Slot>>,
    defaults: RwLock<Option<ScalarStore>>,
    /// Instance default for lookups that do not pass [`LookupOptions`].
    /// Not synchronized with lookups already in progress.
    allow_lazy: AtomicBool,
    schema: Option<Arc<dyn Schema>>,
}

/// A shared handle to a keyed metadata store.
///
/// Cloning the handle aliases the store. Use
/// [`clone_shallow`](Self::clone_shallow) or
/// [`deep_clone`](Self::deep_clone) for copies.
#[derive(Clone)]
pub struct ScalarStore {
    inner: Arc<Inner>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Strip the legacy computed-value suffix, if present.
fn computed_target(key: &str) -> &str {
    key.strip_suffix(COMPUTED_SUFFIX).unwrap_or(key)
}

impl ScalarStore {
    fn build(
        entries: HashMap<String, Slot>,
        defaults: Option<ScalarStore>,
        allow_lazy: bool,
        schema: Option<Arc<dyn Schema>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(entries),
                defaults: RwLock::new(defaults),
                allow_lazy: AtomicBool::new(allow_lazy),
                schema,
            }),
        }
    }

    /// Create an empty store with no defaults.
    pub fn new() -> Self {
        Self::build(HashMap::new(), None, true, None)
    }

    /// Create an empty store that reads through to `defaults`.
    pub fn with_defaults(defaults: ScalarStore) -> Self {
        Self::build(HashMap::new(), Some(defaults), true, None)
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self::build(HashMap::new(), None, config.allow_lazy, None)
    }

    /// Create an empty store whose writes pass through `schema`.
    pub fn with_schema(schema: Arc<dyn Schema>) -> Self {
        Self::build(HashMap::new(), None, true, Some(schema))
    }

    pub fn schema(&self) -> Option<&Arc<dyn Schema>> {
        self.inner.schema.as_ref()
    }

    /// `true` if both handles refer to the same store.
    pub fn ptr_eq(&self, other: &ScalarStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------------------------------------------------------
    // Lazy-execution flag
    // ---------------------------------------------------------------

    pub fn allow_lazy(&self) -> bool {
        self.inner.allow_lazy.load(Ordering::Relaxed)
    }

    /// Change the instance default for [`get`](Self::get).
    ///
    /// Lookups already in flight may observe either setting. Call sites
    /// that need a definite answer should use
    /// [`get_with`](Self::get_with) and pass [`LookupOptions`].
    pub fn set_allow_lazy(&self, allow: bool) {
        self.inner.allow_lazy.store(allow, Ordering::Relaxed);
    }

    fn instance_options(&self) -> LookupOptions {
        LookupOptions {
            allow_lazy: self.allow_lazy(),
        }
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Store `value` under the literal `key`, returning the previous local
    /// value.
    ///
    /// `key` is not parsed: `put("a.b", v)` sets a key containing a dot.
    /// A [`Value::Lazy`] registers a procedure for `key` (with any
    /// [`COMPUTED_SUFFIX`] removed) instead of setting a value; the
    /// previously registered procedure, if any, is returned.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> MetaResult<Option<Value>> {
        let key = key.into();
        let value = value.into();

        if let Value::Lazy(procedure) = value {
            return Ok(self.put_computed(computed_target(&key), procedure).map(Value::Lazy));
        }

        let mut entries = write(&self.inner.entries);
        let value = match &self.inner.schema {
            Some(schema) => {
                let existing = entries.get(&key).and_then(|slot| slot.value.as_ref());
                schema.intercept(&key, value, existing)?
            }
            None => value,
        };
        Ok(entries.entry(key).or_default().value.replace(value))
    }

    /// Register `procedure` to compute `key` on demand.
    pub fn put_computed(&self, key: &str, procedure: LazyValue) -> Option<LazyValue> {
        let mut entries = write(&self.inner.entries);
        entries
            .entry(key.to_string())
            .or_default()
            .computed
            .replace(procedure)
    }

    /// The procedure registered locally for `key`.
    pub fn computed(&self, key: &str) -> Option<LazyValue> {
        read(&self.inner.entries)
            .get(computed_target(key))
            .and_then(|slot| slot.computed.clone())
    }

    /// Remove the local value under `key`.
    ///
    /// A registered procedure stays registered, so the next lookup
    /// recomputes the value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut entries = write(&self.inner.entries);
        let slot = entries.get_mut(key)?;
        let old = slot.value.take();
        if slot.is_vacant() {
            entries.remove(key);
        }
        old
    }

    /// Unregister the procedure for `key`. The memoized value, if any,
    /// remains.
    pub fn remove_computed(&self, key: &str) -> Option<LazyValue> {
        let key = computed_target(key);
        let mut entries = write(&self.inner.entries);
        let slot = entries.get_mut(key)?;
        let old = slot.computed.take();
        if slot.is_vacant() {
            entries.remove(key);
        }
        old
    }

    /// Clear local entries. Defaults remain visible.
    pub fn remove_all(&self) {
        write(&self.inner.entries).clear();
    }

    // ---------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------

    /// Resolve `key` through local entries, procedures, nested containers
    /// and the defaults chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_with(key, None, self.instance_options())
    }

    /// Like [`get`](Self::get), returning `fallback` when nothing resolves.
    ///
    /// For a plain key (no `.` or `[n]`), supplying a fallback skips the
    /// defaults chain: a key absent locally yields `fallback` even if an
    /// ancestor has it. Compound keys still consult the chain.
    pub fn get_or(&self, key: &str, fallback: impl Into<Value>) -> Value {
        let fallback = fallback.into();
        self.get_with(key, Some(fallback.clone()), self.instance_options())
            .unwrap_or(fallback)
    }

    /// Like [`get`](Self::get), overriding whether procedures may run.
    pub fn get_or_compute(&self, key: &str, allow_lazy: bool) -> Option<Value> {
        self.get_with(key, None, LookupOptions { allow_lazy })
    }

    /// The general lookup: explicit fallback and options.
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

    /// Resolve without protection, reporting where the value came from.
    ///
    /// The returned value may be an ancestor's own container. This is the
    /// step every hop of a compound lookup uses; public lookups wrap the
    /// result with [`Resolved::into_protected`].
    pub fn resolve(&self, key: &str, has_fallback: bool, opts: LookupOptions) -> Option<Resolved> {
        let hop = split_name(key);

        if let Some(value) = self.lookup_local(&hop.head, opts) {
            return match hop.rest {
                None => Some(Resolved::local(value)),
                Some(rest) => resolve_rest(&value, rest, has_fallback, opts),
            };
        }

        // A caller-supplied fallback for a plain key short-circuits the chain.
        if hop.is_leaf() && has_fallback {
            return None;
        }

        let defaults = self.defaults()?;
        defaults
            .resolve(key, has_fallback, opts)
            .map(Resolved::inherited)
    }

    /// Local value for `name`, running its procedure if allowed.
    fn lookup_local(&self, name: &str, opts: LookupOptions) -> Option<Value> {
        let procedure = {
            let entries = read(&self.inner.entries);
            let slot = entries.get(name)?;
            if let Some(value) = &slot.value {
                return Some(value.clone());
            }
            if !opts.allow_lazy {
                return None;
            }
            slot.computed.clone()?
        };

        // No store lock is held while the hook runs; the slot is re-read
        // under the procedure lock in case a concurrent caller memoized.
        let fetched = procedure.fetch_memoized(
            || self.local_value(name),
            |value| self.memoize(name, value.clone()),
        );
        match fetched.status {
            ProcedureStatus::Ok | ProcedureStatus::ApplicationError => fetched.value,
            status => {
                debug!(key = name, ?status, "procedure produced no value");
                None
            }
        }
    }

    fn local_value(&self, name: &str) -> Option<Value> {
        read(&self.inner.entries)
            .get(name)
            .and_then(|slot| slot.value.clone())
    }

    fn memoize(&self, name: &str, value: Value) {
        let mut entries = write(&self.inner.entries);
        let slot = entries.entry(name.to_string()).or_default();
        if slot.value.is_none() {
            debug!(key = name, "memoized computed value");
            slot.value = Some(value);
        }
    }

    /// `true` if `key` resolves, without running any procedure.
    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key, false, LookupOptions::no_lazy()).is_some()
    }

    /// `true` if `key` has a local value or a local procedure.
    pub fn contains_key(&self, key: &str) -> bool {
        read(&self.inner.entries).contains_key(key)
    }

    /// Resolve `key` and convert it, failing if the stored type differs.
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

    // ---------------------------------------------------------------
    // Enumeration
    // ---------------------------------------------------------------

    /// Number of local keys (values or procedures).
    pub fn len(&self) -> usize {
        read(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner.entries).is_empty()
    }

    /// Local keys, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.entries).keys().cloned().collect();
        names.sort();
        names
    }

    /// Every key visible from this store: local keys plus those of all
    /// ancestors, sorted.
    pub fn metadatum_names(&self) -> Vec<String> {
        // Furthest ancestor first so nearer stores are applied last.
        let mut chain = vec![self.clone()];
        while let Some(parent) = chain.last().and_then(ScalarStore::defaults) {
            chain.push(parent);
        }
        let mut names = BTreeSet::new();
        for store in chain.iter().rev() {
            names.extend(read(&store.inner.entries).keys().cloned());
        }
        names.into_iter().collect()
    }

    // ---------------------------------------------------------------
    // Defaults chain
    // ---------------------------------------------------------------

    pub fn defaults(&self) -> Option<ScalarStore> {
        read(&self.inner.defaults).clone()
    }

    /// `true` if `other` is this store or one of its ancestors.
    pub fn chain_contains(&self, other: &ScalarStore) -> bool {
        let mut current = Some(self.clone());
        while let Some(store) = current {
            if store.ptr_eq(other) {
                return true;
            }
            current = store.defaults();
        }
        false
    }

    /// Replace the defaults link, returning the previous one.
    pub fn set_defaults(&self, defaults: Option<ScalarStore>) -> MetaResult<Option<ScalarStore>> {
        if let Some(candidate) = &defaults {
            if candidate.chain_contains(self) {
                return Err(MetaError::CyclicDefaults);
            }
        }
        debug!(attached = defaults.is_some(), "reparented store");
        Ok(std::mem::replace(&mut *write(&self.inner.defaults), defaults))
    }

    /// Sever the link to the live ancestor chain.
    ///
    /// The defaults are replaced by a deep copy of their current contents,
    /// so later changes to the original ancestors are not visible here.
    pub fn detach(&self) {
        let Some(current) = self.defaults() else {
            return;
        };
        let copy = current.deep_clone();
        *write(&self.inner.defaults) = Some(copy);
        debug!("detached store from defaults chain");
    }

    // ---------------------------------------------------------------
    // Copies
    // ---------------------------------------------------------------

    /// A new store with the same local entries and defaults link. Nested
    /// containers are shared with this store.
    pub fn clone_shallow(&self) -> ScalarStore {
        let entries = read(&self.inner.entries).clone();
        Self::build(
            entries,
            self.defaults(),
            self.allow_lazy(),
            self.inner.schema.clone(),
        )
    }

    /// A fully independent copy: nested containers and the whole defaults
    /// chain are copied recursively. Procedures are shared.
    ///
    /// A container reached more than once is copied once, so shared and
    /// self-referencing structure is reproduced in the copy.
    pub fn deep_clone(&self) -> ScalarStore {
        self.deep_clone_with(&mut CloneMemo::default())
    }

    pub(crate) fn deep_clone_with(&self, memo: &mut CloneMemo) -> ScalarStore {
        let identity = Arc::as_ptr(&self.inner).cast::<()>();
        if let Some(copy) = memo.stores.get(&identity) {
            return copy.clone();
        }
        let copy = Self::build(
            HashMap::new(),
            None,
            self.allow_lazy(),
            self.inner.schema.clone(),
        );
        memo.stores.insert(identity, copy.clone());

        // Snapshot first: nested values may lead back to this store.
        let snapshot = read(&self.inner.entries).clone();
        let entries: HashMap<String, Slot> = snapshot
            .into_iter()
            .map(|(key, slot)| {
                let slot = Slot {
                    value: slot.value.map(|value| value.deep_clone_with(memo)),
                    computed: slot.computed,
                };
                (key, slot)
            })
            .collect();
        let defaults = self.defaults().map(|d| d.deep_clone_with(memo));
        *write(&copy.inner.entries) = entries;
        *write(&copy.inner.defaults) = defaults;
        copy
    }
}

impl Default for ScalarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScalarStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarStore")
            .field("keys", &self.local_names())
            .field("has_defaults", &self.defaults().is_some())
            .finish()
    }
}
