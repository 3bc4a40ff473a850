//! The storage engine: open/close/put/get/delete over segment files.
//!
//! ## Locking
//!
//! - `write_mu` is exclusive and held by put/delete/close for their full
//!   duration; it serializes all log appends and all allocator state
//!   changes. Replay runs during `open`, before the handle is shared.
//! - `life_mu` guards the observable segment list. `get` holds it shared
//!   for its whole duration (the list cannot be reallocated or unmapped
//!   under it); the growth path and `close` take it exclusive only around
//!   the list mutation.
//! - Per-shard index locks are acquired while the larger lock is already
//!   held (`write_mu` for writers, `life_mu` shared for readers). No
//!   component holds two shard locks at once, and `life_mu` is never
//!   acquired while a shard lock is held, so the order is acyclic.
//!
//! ## Write ordering
//!
//! A put copies value bytes first, then the record header and key with a
//! zero CRC, then patches the CRC, then updates the index. A crash at any
//! intermediate point leaves a record that replay rejects (CRC mismatch)
//! and a value block that replay never observes — the record only becomes
//! meaningful once its CRC is in place.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::index::{Entry, ShardedIndex};
use crate::manager::SegmentManager;
use crate::record::{self, Header, FLAG_DELETE, FLAG_PUT, HEADER_SIZE, MAGIC, VERSION};
use crate::recovery;
use crate::segment::Segment;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;
/// Maximum value length in bytes.
pub const MAX_VAL_LEN: usize = u32::MAX as usize;

/// An embedded, single-process key-value store over memory-mapped segment
/// files.
///
/// Many concurrent readers and a single concurrent writer are supported
/// within one process. The store is **not** safe across processes sharing
/// the same files.
pub struct Store {
    write_mu: Mutex<()>,
    life: RwLock<SegmentManager>,
    index: ShardedIndex,
}

impl Store {
    /// Open or create a store.
    ///
    /// `base` is the data file path prefix; segment files live at
    /// `<base>.000`, `<base>.001`, .... Existing segments are discovered in
    /// id order and their logs replayed to rebuild the in-memory index;
    /// segment 0 is created if none exist.
    pub fn open(base: impl AsRef<Path>, seg_size: u64) -> StoreResult<Store> {
        if seg_size == 0 {
            return Err(StoreError::BadArgument("segment size must be non-zero"));
        }
        let mut manager = SegmentManager::new(base.as_ref().to_path_buf(), seg_size);
        manager.open_base()?;
        manager.ensure_one()?;
        let index = ShardedIndex::new();
        recovery::rebuild(&manager, &index);
        Ok(Store {
            write_mu: Mutex::new(()),
            life: RwLock::new(manager),
            index,
        })
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Keys must be 1..=65535 bytes, values 1..=(2³²−1) bytes; anything else
    /// is a [`StoreError::BadArgument`]. When the last segment cannot hold
    /// the value block plus its log record, a new segment is created; if the
    /// fresh segment refuses as well the result is [`StoreError::NoSpace`].
    pub fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StoreError::BadArgument("key length must be in 1..=65535"));
        }
        if value.is_empty() || value.len() > MAX_VAL_LEN {
            return Err(StoreError::BadArgument(
                "value length must be in 1..=4294967295",
            ));
        }
        let key_len = key.len() as u16;
        let val_len = value.len() as u32;
        let rec_total = HEADER_SIZE as u64 + u64::from(key_len);

        let _w = self.write_lock();
        let mut seg = self.last_segment()?;
        let val_off = match seg.alloc(val_len, rec_total) {
            Some(off) => off,
            None => {
                seg = self.grow()?;
                match seg.alloc(val_len, rec_total) {
                    Some(off) => off,
                    None => return Err(StoreError::NoSpace),
                }
            }
        };

        // SAFETY: we hold `write_mu`; the value block was just allocated and
        // is not yet visible through the index, and the log tail past
        // `log_end` is owned by the writer. All ranges are in bounds
        // (`alloc` maintains `log_end + rec_total <= val_end`).
        unsafe {
            seg.view().write(val_off, value);
            let off = seg.log_end();
            let mut hdr = [0u8; HEADER_SIZE];
            record::encode_header(
                &mut hdr,
                &Header {
                    magic: MAGIC,
                    version: VERSION,
                    flags: FLAG_PUT,
                    key_len,
                    val_len,
                    val_off,
                    crc32: 0,
                },
            );
            seg.view().write(off, &hdr);
            seg.view().write(off + HEADER_SIZE as u64, key);
            // CRC last: the record is not valid until this word lands.
            let crc = record::calc_crc(FLAG_PUT, key_len, val_len, val_off, key);
            seg.view().write(off + 24, &crc.to_le_bytes());
            seg.set_log_end(off + rec_total);
        }

        self.index.update(key, |slot| {
            // Reclaim the superseded block, but only within the segment the
            // new record landed in; blocks in earlier segments stay put.
            if let Some(old) = slot {
                if old.seg_id == seg.id() {
                    seg.free_block(old.val_off, old.val_len);
                }
            }
            *slot = Some(Entry {
                seg_id: seg.id(),
                val_off,
                val_len,
            });
        });
        Ok(())
    }

    /// Fetch a copy of the value stored under `key`, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let mgr = self.life.read().unwrap_or_else(PoisonError::into_inner);
        if mgr.is_empty() {
            return Err(StoreError::Closed);
        }
        let segs = mgr.segments();
        self.index.read_with(key, |entry| {
            let Some(e) = entry else { return Ok(None) };
            let Some(seg) = segs.get(e.seg_id as usize) else {
                return Err(StoreError::Corrupt(format!(
                    "index entry references unknown segment {}",
                    e.seg_id
                )));
            };
            let end = e
                .val_off
                .checked_add(u64::from(e.val_len))
                .filter(|&end| end <= seg.seg_size());
            if end.is_none() {
                return Err(StoreError::Corrupt(format!(
                    "index entry range [{}, +{}) escapes segment {}",
                    e.val_off, e.val_len, e.seg_id
                )));
            }
            let mut out = vec![0u8; e.val_len as usize];
            // SAFETY: the range was published by a completed put, is in
            // bounds by the check above, and cannot be freed (hence reused
            // and rewritten) while this shard's read lock is held.
            unsafe { seg.view().read(e.val_off, &mut out) };
            Ok(Some(out))
        })
    }

    /// Remove `key`.
    ///
    /// A delete record is appended even when the key is absent, so the
    /// removal survives replay regardless of where earlier puts landed.
    pub fn delete(&self, key: &[u8]) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StoreError::BadArgument("key length must be in 1..=65535"));
        }
        let key_len = key.len() as u16;
        let rec_total = HEADER_SIZE as u64 + u64::from(key_len);

        let _w = self.write_lock();
        let mut seg = self.last_segment()?;
        if seg.log_end() + rec_total > seg.val_end() {
            seg = self.grow()?;
            if seg.log_end() + rec_total > seg.val_end() {
                return Err(StoreError::NoSpace);
            }
        }

        // SAFETY: we hold `write_mu` and the log tail is writer-owned; the
        // range check above keeps the record inside the log region.
        unsafe {
            let off = seg.log_end();
            let mut hdr = [0u8; HEADER_SIZE];
            record::encode_header(
                &mut hdr,
                &Header {
                    magic: MAGIC,
                    version: VERSION,
                    flags: FLAG_DELETE,
                    key_len,
                    val_len: 0,
                    val_off: 0,
                    crc32: 0,
                },
            );
            seg.view().write(off, &hdr);
            seg.view().write(off + HEADER_SIZE as u64, key);
            let crc = record::calc_crc(FLAG_DELETE, key_len, 0, 0, key);
            seg.view().write(off + 24, &crc.to_le_bytes());
            seg.set_log_end(off + rec_total);
        }

        self.index.update(key, |slot| {
            if let Some(old) = slot {
                if old.seg_id == seg.id() {
                    seg.free_block(old.val_off, old.val_len);
                }
            }
            *slot = None;
        });
        Ok(())
    }

    /// Flush every segment's mapping to stable storage.
    pub fn sync(&self) -> StoreResult<()> {
        let mgr = self.life.read().unwrap_or_else(PoisonError::into_inner);
        if mgr.is_empty() {
            return Err(StoreError::Closed);
        }
        for seg in mgr.segments() {
            seg.sync()?;
        }
        Ok(())
    }

    /// Flush and unmap every segment. Idempotent; subsequent operations
    /// return [`StoreError::Closed`]. Returns the first flush error while
    /// still closing the rest.
    pub fn close(&self) -> StoreResult<()> {
        let _w = self.write_lock();
        let mut mgr = self.life.write().unwrap_or_else(PoisonError::into_inner);
        let res = mgr.close();
        self.index.clear();
        res
    }

    fn write_lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned write lock witnesses a writer panic; the on-disk state
        // is still whatever the ordering discipline left behind, which
        // replay handles, so continuing is safe.
        self.write_mu.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone out the segment currently receiving writes.
    fn last_segment(&self) -> StoreResult<Arc<Segment>> {
        let mgr = self.life.read().unwrap_or_else(PoisonError::into_inner);
        mgr.last().cloned().ok_or(StoreError::Closed)
    }

    /// Append a new segment under the exclusive lifecycle lock.
    ///
    /// Caller holds `write_mu`. An I/O failure creating the file propagates
    /// as-is and leaves the segment list unchanged.
    fn grow(&self) -> StoreResult<Arc<Segment>> {
        let mut mgr = self.life.write().unwrap_or_else(PoisonError::into_inner);
        if mgr.is_empty() {
            return Err(StoreError::Closed);
        }
        tracing::debug!(segments = mgr.segments().len(), "last segment exhausted, growing");
        mgr.append_new()
    }
}
