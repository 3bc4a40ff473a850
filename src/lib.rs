//! `mapkv`: an embedded, single-process key-value store over memory-mapped
//! segment files.
//!
//! Byte-string keys map to byte-string values. Each segment is one
//! fixed-size file, mapped read/write shared, holding an append-only log
//! region growing upward and a value region growing downward; freed value
//! blocks are reused through a size-classed freelist. On reopen the index
//! is rebuilt by replaying the log regions.
//!
//! ## Contract (what you can rely on)
//!
//! - **Crash tolerance**: every log record carries a CRC written last;
//!   replay stops at the first torn or corrupt record and the store starts
//!   from the good prefix. Records after the anomaly are lost; subsequent
//!   writes overwrite them.
//! - **Durability**: the mappings are flushed on [`Store::close`] (and on
//!   [`Store::sync`]); between those barriers, persistence of the mapping
//!   is up to the OS.
//! - **Concurrency**: many readers, one writer, within a single process.
//!   Sharing the data files across processes is not supported.
//!
//! ```no_run
//! use mapkv::Store;
//!
//! let store = Store::open("/var/lib/app/data", 64 * 1024 * 1024)?;
//! store.put(b"greeting", b"hello")?;
//! assert_eq!(store.get(b"greeting")?.as_deref(), Some(&b"hello"[..]));
//! store.delete(b"greeting")?;
//! store.close()?;
//! # Ok::<(), mapkv::StoreError>(())
//! ```

pub mod engine;
pub mod error;
pub mod fixed;
mod index;
mod manager;
pub mod record;
mod recovery;
mod segment;

pub use engine::{Store, MAX_KEY_LEN, MAX_VAL_LEN};
pub use error::{StoreError, StoreResult};
pub use fixed::{get_fixed, put_fixed};
