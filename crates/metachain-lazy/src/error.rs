use thiserror::Error;

/// Non-success outcomes a hook may report without panicking.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcedureError<T> {
    /// The hook completed but the application considers the result an
    /// error. The carried value is still cached and handed to callers.
    #[error("application error")]
    Application(T),

    /// The hook could not produce a value at all.
    #[error("execution failed: {0}")]
    Execution(String),
}
