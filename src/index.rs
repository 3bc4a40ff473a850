//! Sharded key index: key -> (segment id, value offset, value length).
//!
//! Keys hash to one of [`SHARDS`] shards via FNV-1a (32-bit); each shard is
//! an independent `RwLock<HashMap>`. The index exposes no iteration and no
//! ordering.
//!
//! Lock pairing that the engine relies on: `get` copies value bytes out of
//! the mapping inside [`ShardedIndex::read_with`] (shard read lock held),
//! and put/delete free a superseded block inside [`ShardedIndex::update`]
//! (shard write lock held). A block therefore cannot be freed — and hence
//! reused and rewritten — while a reader is still copying it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Number of index shards.
pub(crate) const SHARDS: usize = 32;

/// Where a key's current value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub seg_id: u32,
    pub val_off: u64,
    pub val_len: u32,
}

/// FNV-1a (32-bit) over the key bytes.
fn fnv1a(key: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in key {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Sharded keyed mapping from key to [`Entry`].
pub(crate) struct ShardedIndex {
    shards: Vec<RwLock<HashMap<Vec<u8>, Entry>>>,
}

impl ShardedIndex {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &[u8]) -> &RwLock<HashMap<Vec<u8>, Entry>> {
        &self.shards[fnv1a(key) as usize % SHARDS]
    }

    // A poisoned shard only witnesses a panic under the lock; the map is
    // still structurally valid, so recover the guard.

    pub(crate) fn get(&self, key: &[u8]) -> Option<Entry> {
        let map = self
            .shard(key)
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.get(key).copied()
    }

    pub(crate) fn set(&self, key: &[u8], entry: Entry) {
        let mut map = self
            .shard(key)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_vec(), entry);
    }

    pub(crate) fn delete(&self, key: &[u8]) {
        let mut map = self
            .shard(key)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
    }

    /// Empty every shard under its write lock.
    pub(crate) fn clear(&self) {
        for shard in &self.shards {
            shard
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    /// Run `f` with the entry for `key` (if any) under the shard read lock.
    pub(crate) fn read_with<R>(&self, key: &[u8], f: impl FnOnce(Option<&Entry>) -> R) -> R {
        let map = self
            .shard(key)
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(map.get(key))
    }

    /// Run `f` with exclusive access to `key`'s slot under the shard write
    /// lock; `None` on exit removes the mapping.
    pub(crate) fn update<R>(&self, key: &[u8], f: impl FnOnce(&mut Option<Entry>) -> R) -> R {
        let mut map = self
            .shard(key)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut slot = map.get(key).copied();
        let out = f(&mut slot);
        match slot {
            Some(entry) => {
                map.insert(key.to_vec(), entry);
            }
            None => {
                map.remove(key);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seg_id: u32, val_off: u64, val_len: u32) -> Entry {
        Entry {
            seg_id,
            val_off,
            val_len,
        }
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn set_get_delete() {
        let idx = ShardedIndex::new();
        assert_eq!(idx.get(b"k"), None);
        idx.set(b"k", entry(0, 100, 5));
        assert_eq!(idx.get(b"k"), Some(entry(0, 100, 5)));
        idx.set(b"k", entry(1, 200, 6));
        assert_eq!(idx.get(b"k"), Some(entry(1, 200, 6)));
        idx.delete(b"k");
        assert_eq!(idx.get(b"k"), None);
    }

    #[test]
    fn clear_empties_every_shard() {
        let idx = ShardedIndex::new();
        // Enough distinct keys to land in many shards.
        for i in 0..256u32 {
            idx.set(format!("key-{i}").as_bytes(), entry(0, u64::from(i), 1));
        }
        idx.clear();
        for i in 0..256u32 {
            assert_eq!(idx.get(format!("key-{i}").as_bytes()), None);
        }
    }

    #[test]
    fn update_inserts_and_removes() {
        let idx = ShardedIndex::new();
        let old = idx.update(b"k", |slot| {
            let old = *slot;
            *slot = Some(entry(0, 16, 4));
            old
        });
        assert_eq!(old, None);
        assert_eq!(idx.get(b"k"), Some(entry(0, 16, 4)));

        let old = idx.update(b"k", |slot| {
            let old = *slot;
            *slot = None;
            old
        });
        assert_eq!(old, Some(entry(0, 16, 4)));
        assert_eq!(idx.get(b"k"), None);
    }

    #[test]
    fn read_with_sees_the_current_entry() {
        let idx = ShardedIndex::new();
        idx.set(b"k", entry(2, 64, 8));
        let seen = idx.read_with(b"k", |e| e.copied());
        assert_eq!(seen, Some(entry(2, 64, 8)));
        let missing = idx.read_with(b"absent", |e| e.copied());
        assert_eq!(missing, None);
    }
}
