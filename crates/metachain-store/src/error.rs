use metachain_path::PathError;

use crate::value::Kind;

/// Errors from metadata store operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The value stored at a key or index is not of the requested type.
    #[error("type mismatch at {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: Kind,
        found: Kind,
    },

    /// A size, capacity or growth argument is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The key may not be overwritten.
    #[error("write-protected key: {key}")]
    WriteProtected { key: String },

    /// An index lies outside the logical size of a sequence.
    #[error("index {index} out of range for sequence of size {size}")]
    IndexOutOfRange { index: usize, size: usize },

    /// Attaching the defaults store would make the chain circular.
    #[error("defaults chain would become circular")]
    CyclicDefaults,

    /// Configuration text could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

/// Result alias for store operations.
pub type MetaResult<T> = Result<T, MetaError>;
