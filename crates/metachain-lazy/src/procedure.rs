//! The [`LazyProcedure`] cell and its status bookkeeping.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::ProcedureError;

type Hook<T> = Box<dyn FnMut() -> Result<T, ProcedureError<T>> + Send>;

/// Outcome of the most recent run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProcedureStatus {
    /// The hook has never completed.
    #[default]
    NotRun,
    /// The hook produced a value.
    Ok,
    /// The hook completed with an application-level error value.
    ApplicationError,
    /// The hook reported an execution failure or panicked.
    ExecutionFailure,
}

impl ProcedureStatus {
    /// `true` for the statuses that update the cached value.
    pub fn has_value(self) -> bool {
        matches!(self, ProcedureStatus::Ok | ProcedureStatus::ApplicationError)
    }
}

/// A status paired with the cached value as of the end of a fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    pub status: ProcedureStatus,
    pub value: Option<T>,
}

struct State<T> {
    running: bool,
    runs: u64,
    status: ProcedureStatus,
    last: Option<T>,
}

struct Inner<T> {
    /// Held for the whole duration of a run.
    hook: Mutex<Hook<T>>,
    state: Mutex<State<T>>,
    idle: Condvar,
}

/// A shared handle to a deferred computation.
///
/// Cloning the handle shares the hook, the cache and the lock.
pub struct LazyProcedure<T> {
    inner: Arc<Inner<T>>,
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> LazyProcedure<T> {
    /// Wrap a hook.
    pub fn new<F>(hook: F) -> Self
    where
        F: FnMut() -> Result<T, ProcedureError<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                hook: Mutex::new(Box::new(hook)),
                state: Mutex::new(State {
                    running: false,
                    runs: 0,
                    status: ProcedureStatus::NotRun,
                    last: None,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// A procedure whose hook always succeeds with `f()`.
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self::new(move || Ok(f()))
    }

    /// Execute the hook once and return the resulting status.
    pub fn run(&self) -> ProcedureStatus {
        let mut hook = lock(&self.inner.hook);
        self.run_locked(&mut hook)
    }

    /// Execute the hook and return the cached value, under one lock
    /// acquisition.
    pub fn fetch(&self) -> Fetched<T> {
        let mut hook = lock(&self.inner.hook);
        let status = self.run_locked(&mut hook);
        Fetched {
            status,
            value: lock(&self.inner.state).last.clone(),
        }
    }

    /// Like [`fetch`](Self::fetch), for callers that keep their own copy
    /// of a successful result.
    ///
    /// With the procedure lock held, `cached` is consulted first; if it
    /// yields a value the hook is not invoked. Otherwise the hook runs and,
    /// on `Ok`, `memoize` receives the value before the lock is released.
    /// A caller that queued behind a successful run therefore finds that
    /// run's result in its cache instead of recomputing.
    pub fn fetch_memoized<C, M>(&self, cached: C, memoize: M) -> Fetched<T>
    where
        C: FnOnce() -> Option<T>,
        M: FnOnce(&T),
    {
        let mut hook = lock(&self.inner.hook);
        if let Some(value) = cached() {
            debug!("reusing memoized procedure result");
            return Fetched {
                status: ProcedureStatus::Ok,
                value: Some(value),
            };
        }
        let status = self.run_locked(&mut hook);
        let value = lock(&self.inner.state).last.clone();
        if status == ProcedureStatus::Ok {
            if let Some(value) = &value {
                memoize(value);
            }
        }
        Fetched { status, value }
    }

    fn run_locked(&self, hook: &mut Hook<T>) -> ProcedureStatus {
        lock(&self.inner.state).running = true;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook()));

        let mut state = lock(&self.inner.state);
        match outcome {
            Ok(Ok(value)) => {
                state.runs += 1;
                state.status = ProcedureStatus::Ok;
                state.last = Some(value);
            }
            Ok(Err(ProcedureError::Application(value))) => {
                state.runs += 1;
                state.status = ProcedureStatus::ApplicationError;
                state.last = Some(value);
            }
            Ok(Err(ProcedureError::Execution(reason))) => {
                state.runs += 1;
                state.status = ProcedureStatus::ExecutionFailure;
                warn!(%reason, "lazy procedure failed");
            }
            Err(_) => {
                state.status = ProcedureStatus::ExecutionFailure;
                warn!("lazy procedure panicked");
            }
        }
        state.running = false;
        let status = state.status;
        drop(state);
        self.inner.idle.notify_all();
        status
    }
}

impl<T> LazyProcedure<T> {
    /// `true` while the hook is executing.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).running
    }

    /// `true` once the hook has completed normally at least once.
    pub fn has_run(&self) -> bool {
        self.run_count() > 0
    }

    /// Number of normal completions.
    pub fn run_count(&self) -> u64 {
        lock(&self.inner.state).runs
    }

    pub fn last_status(&self) -> ProcedureStatus {
        lock(&self.inner.state).status
    }

    /// Block until no run is in progress.
    pub fn wait_idle(&self) {
        let state = lock(&self.inner.state);
        let _state = self
            .inner
            .idle
            .wait_while(state, |s| s.running)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// `true` if both handles share one procedure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> LazyProcedure<T> {
    /// The cached value from the last run that produced one.
    pub fn last_value(&self) -> Option<T> {
        lock(&self.inner.state).last.clone()
    }
}

impl<T> Clone for LazyProcedure<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for LazyProcedure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("LazyProcedure")
            .field("running", &state.running)
            .field("runs", &state.runs)
            .field("status", &state.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn counting(counter: Arc<AtomicUsize>) -> LazyProcedure<i64> {
        LazyProcedure::from_fn(move || counter.fetch_add(1, Ordering::SeqCst) as i64 + 100)
    }

    #[test]
    fn fresh_procedure_has_not_run() {
        let p = counting(Arc::new(AtomicUsize::new(0)));
        assert!(!p.has_run());
        assert!(!p.is_running());
        assert_eq!(p.run_count(), 0);
        assert_eq!(p.last_status(), ProcedureStatus::NotRun);
        assert_eq!(p.last_value(), None);
    }

    #[test]
    fn fetch_runs_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = counting(calls.clone());

        let first = p.fetch();
        assert_eq!(first.status, ProcedureStatus::Ok);
        assert_eq!(first.value, Some(100));

        let second = p.fetch();
        assert_eq!(second.value, Some(101));
        assert_eq!(p.run_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn application_error_caches_value() {
        let p: LazyProcedure<String> =
            LazyProcedure::new(|| Err(ProcedureError::Application("bad header".into())));
        let fetched = p.fetch();
        assert_eq!(fetched.status, ProcedureStatus::ApplicationError);
        assert_eq!(fetched.value.as_deref(), Some("bad header"));
        assert_eq!(p.run_count(), 1);
    }

    #[test]
    fn execution_failure_keeps_previous_value() {
        let mut first = true;
        let p: LazyProcedure<i64> = LazyProcedure::new(move || {
            if std::mem::take(&mut first) {
                Ok(7)
            } else {
                Err(ProcedureError::Execution("disk gone".into()))
            }
        });
        assert_eq!(p.run(), ProcedureStatus::Ok);
        let fetched = p.fetch();
        assert_eq!(fetched.status, ProcedureStatus::ExecutionFailure);
        assert_eq!(fetched.value, Some(7));
        assert_eq!(p.run_count(), 2);
    }

    #[test]
    fn panic_becomes_failure_without_counting() {
        let p: LazyProcedure<i64> = LazyProcedure::new(|| panic!("boom"));
        assert_eq!(p.run(), ProcedureStatus::ExecutionFailure);
        assert_eq!(p.run_count(), 0);
        assert!(!p.is_running());
        // The lock is still usable after the panic.
        assert_eq!(p.run(), ProcedureStatus::ExecutionFailure);
    }

    #[test]
    fn fetch_memoized_skips_hook_when_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = counting(calls.clone());
        let cache: Mutex<Option<i64>> = Mutex::new(None);

        let first = p.fetch_memoized(
            || *cache.lock().unwrap(),
            |v| *cache.lock().unwrap() = Some(*v),
        );
        assert_eq!(first.value, Some(100));
        let second = p.fetch_memoized(
            || *cache.lock().unwrap(),
            |v| *cache.lock().unwrap() = Some(*v),
        );
        assert_eq!(second.status, ProcedureStatus::Ok);
        assert_eq!(second.value, Some(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_memoized_does_not_memoize_failures() {
        let p: LazyProcedure<i64> =
            LazyProcedure::new(|| Err(ProcedureError::Application(-1)));
        let mut memoized = false;
        let fetched = p.fetch_memoized(|| None, |_| memoized = true);
        assert_eq!(fetched.status, ProcedureStatus::ApplicationError);
        assert_eq!(fetched.value, Some(-1));
        assert!(!memoized);
    }

    #[test]
    fn concurrent_callers_serialize() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let counter = calls.clone();
        let p: LazyProcedure<i64> = LazyProcedure::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = started_tx.send(());
            let _ = release_rx.lock().unwrap().recv();
            Ok(42)
        });
        let cache: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));

        let spawn_fetch = |p: LazyProcedure<i64>, cache: Arc<Mutex<Option<i64>>>| {
            thread::spawn(move || {
                p.fetch_memoized(
                    || *cache.lock().unwrap(),
                    |v| *cache.lock().unwrap() = Some(*v),
                )
            })
        };

        let a = spawn_fetch(p.clone(), cache.clone());
        started_rx.recv().unwrap();
        assert!(p.is_running());

        let b = spawn_fetch(p.clone(), cache.clone());
        // Give the second caller time to block on the procedure lock.
        thread::sleep(Duration::from_millis(20));
        release_tx.send(()).unwrap();

        assert_eq!(a.join().unwrap().value, Some(42));
        assert_eq!(b.join().unwrap().value, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        p.wait_idle();
        assert!(!p.is_running());
    }

    #[test]
    fn clones_share_state() {
        let p = counting(Arc::new(AtomicUsize::new(0)));
        let q = p.clone();
        p.run();
        assert!(q.has_run());
        assert!(p.ptr_eq(&q));
    }
}
