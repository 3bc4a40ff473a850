//! Fixed-size typed values over the byte-string store.
//!
//! [`put_fixed`] / [`get_fixed`] move pointer-free, fixed-layout types in
//! and out of a [`Store`] as their raw byte representation. The trait
//! bounds are the structural contract: a type containing references,
//! boxes, or heap collections cannot implement `IntoBytes`/`FromBytes`, so
//! only plain value scalars, fixed arrays, and aggregates thereof get
//! through — checked at compile time, not at run time.
//!
//! The engine itself never cares; these helpers are the only place the
//! "no indirect data" contract is enforced.

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::engine::Store;
use crate::error::{StoreError, StoreResult};

/// Store `value` under `key` as its raw byte representation.
pub fn put_fixed<T>(store: &Store, key: &[u8], value: &T) -> StoreResult<()>
where
    T: IntoBytes + Immutable,
{
    store.put(key, value.as_bytes())
}

/// Fetch the value under `key` and reinterpret it as a `T`.
///
/// Returns [`StoreError::SizeMismatch`] when the stored value is not
/// exactly `size_of::<T>()` bytes long (e.g. it was written as a different
/// type or as a plain byte string).
pub fn get_fixed<T>(store: &Store, key: &[u8]) -> StoreResult<Option<T>>
where
    T: FromBytes,
{
    let Some(bytes) = store.get(key)? else {
        return Ok(None);
    };
    if bytes.len() != std::mem::size_of::<T>() {
        return Err(StoreError::SizeMismatch {
            expected: std::mem::size_of::<T>(),
            actual: bytes.len(),
        });
    }
    let value = T::read_from_bytes(&bytes).map_err(|_| StoreError::SizeMismatch {
        expected: std::mem::size_of::<T>(),
        actual: bytes.len(),
    })?;
    Ok(Some(value))
}
