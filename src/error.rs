//! Error types for `mapkv`.

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the `mapkv` crate.
///
/// The `NoSpace`/`BadArgument`/`Closed`/`Corrupt` variants are the sentinel
/// conditions of the public contract; callers are expected to match on them.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A key or value failed validation. Nothing was written.
    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    /// The last segment refused the allocation and a freshly created
    /// segment refused it as well.
    #[error("no space left in store")]
    NoSpace,

    /// Operation invoked after `close`, or before any segment exists.
    #[error("store is closed")]
    Closed,

    /// On-disk or in-memory state inconsistent with the store's invariants
    /// (wrong segment file size, index entry outside the live mapping, ...).
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// A fixed-size typed read found a value of unexpected length.
    #[error("fixed value size mismatch (expected {expected}, got {actual})")]
    SizeMismatch {
        /// `size_of::<T>()` of the requested type.
        expected: usize,
        /// Length of the stored value.
        actual: usize,
    },
}
