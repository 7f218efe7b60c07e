//! Deferred computation cells.
//!
//! A [`LazyProcedure`] wraps a user hook that produces a value on demand.
//! The hook runs under the procedure's own exclusive lock, so concurrent
//! callers of the same procedure serialize: there is exactly one execution
//! in flight at a time, and a caller that arrives while another run is in
//! progress observes that run's result (see [`LazyProcedure::fetch_memoized`]).
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Running -> { Ok | ApplicationError | ExecutionFailure } -> Idle
//! ```
//!
//! A procedure can be run any number of times. Panics inside the hook are
//! caught and reported as [`ProcedureStatus::ExecutionFailure`]; they never
//! unwind into the caller. There is no cancellation or timeout: a hook that
//! blocks blocks every caller of the same procedure.

pub mod error;
pub mod procedure;

pub use error::ProcedureError;
pub use procedure::{Fetched, LazyProcedure, ProcedureStatus};
