use thiserror::Error;

/// Errors produced while splitting a compound key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A bracketed run of digits was recognized as an index but does not
    /// fit in `usize`. Brackets holding anything other than digits are
    /// never an index; they are part of the name.
    #[error("malformed index {segment:?} in key {key:?}")]
    MalformedIndex { key: String, segment: String },

    /// An index hop was requested but the key does not start with a
    /// recognized `[n]`, as with `"[x]"` or `"name"`.
    #[error("expected an index at the start of {key:?}")]
    ExpectedIndex { key: String },
}

/// Convenience alias for path operations.
pub type Result<T> = std::result::Result<T, PathError>;
