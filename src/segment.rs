//! A single storage segment: one fixed-size memory-mapped file.
//!
//! Layout within a segment:
//!
//! - the **log region** occupies `[0, log_end)` and grows upward; it holds
//!   append-only (header, key) records;
//! - the **value region** occupies `[val_end, seg_size)` and grows downward;
//!   it holds raw value bytes at class-aligned offsets.
//!
//! ## Invariants
//!
//! - `log_end <= val_end <= seg_size` at all times.
//! - Every offset on a freelist stack is either present in the truth map
//!   with the same class (live-free) or stale; [`Segment::alloc`] validates
//!   against truth on pop and drops stale entries silently.
//! - An offset is live-free for at most one class at a time;
//!   [`Segment::free_block`] refuses to re-free an offset whose truth entry
//!   already carries the same class.
//!
//! The truth map is the authority for "currently free"; the freelist is a
//! hint stack. Stale hints arise when replay re-frees an offset that a later
//! record reuses, and are resolved lazily at allocation time.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use memmap2::MmapMut;

use crate::error::{StoreError, StoreResult};
use crate::record::size_class;

/// Shared read/write view over a segment's mapping.
///
/// Readers and the single writer access disjoint byte ranges concurrently,
/// so the view hands out no long-lived slices into the mapping; all access
/// is copy-in/copy-out.
#[derive(Debug)]
pub(crate) struct MapView {
    map: UnsafeCell<MmapMut>,
}

// SAFETY: all mutation goes through `write`, whose contract requires the
// caller to hold the engine write lock and to own the target range (an
// unpublished value block or the log tail). `read` only copies from ranges
// that are either published through the index (stable while any reader can
// still observe their entry) or owned by the write-lock holder itself.
unsafe impl Send for MapView {}
unsafe impl Sync for MapView {}

impl MapView {
    fn new(map: MmapMut) -> Self {
        Self {
            map: UnsafeCell::new(map),
        }
    }

    pub(crate) fn len(&self) -> usize {
        // SAFETY: the length of the mapping never changes after creation.
        unsafe { (&*self.map.get()).len() }
    }

    /// Copy `src` into the mapping at `off`.
    ///
    /// # Safety
    ///
    /// The caller must hold the engine write lock, own `[off, off + src.len())`
    /// (no reader can observe it through the index yet), and the range must
    /// lie within the mapping.
    pub(crate) unsafe fn write(&self, off: u64, src: &[u8]) {
        let map = &mut *self.map.get();
        debug_assert!(off as usize + src.len() <= map.len());
        std::ptr::copy_nonoverlapping(src.as_ptr(), map.as_mut_ptr().add(off as usize), src.len());
    }

    /// Copy mapping bytes `[off, off + dst.len())` into `dst`.
    ///
    /// # Safety
    ///
    /// The range must lie within the mapping and must not be concurrently
    /// written: either it was published through the index and the caller
    /// holds the shard lock that pins it live, or the caller holds the
    /// engine write lock.
    pub(crate) unsafe fn read(&self, off: u64, dst: &mut [u8]) {
        let map = &*self.map.get();
        debug_assert!(off as usize + dst.len() <= map.len());
        std::ptr::copy_nonoverlapping(map.as_ptr().add(off as usize), dst.as_mut_ptr(), dst.len());
    }

    /// Flush the mapping to stable storage.
    pub(crate) fn flush(&self) -> std::io::Result<()> {
        // SAFETY: `flush` takes `&self` on the mapping and issues msync; it
        // does not alias the data accesses above.
        unsafe { (*self.map.get()).flush() }
    }
}

/// Allocator bookkeeping; mutated only by the engine write-lock holder.
#[derive(Debug)]
struct SegmentState {
    log_end: u64,
    val_end: u64,
    /// class -> LIFO stack of previously freed block offsets.
    free: HashMap<u64, Vec<u64>>,
    /// offset -> class of currently-free blocks (the authority).
    truth: HashMap<u64, u64>,
}

/// One fixed-size mapped file holding a log region and a value region.
#[derive(Debug)]
pub(crate) struct Segment {
    id: u32,
    seg_size: u64,
    view: MapView,
    state: Mutex<SegmentState>,
}

impl Segment {
    /// Open or create the segment file at `path`.
    ///
    /// With `create`, the file is created if missing and sized to
    /// `seg_size`; otherwise an existing file whose size differs from
    /// `seg_size` is reported as corrupt.
    pub(crate) fn open(path: &Path, id: u32, seg_size: u64, create: bool) -> StoreResult<Segment> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        if create {
            file.set_len(seg_size)?;
        } else {
            let len = file.metadata()?.len();
            if len != seg_size {
                return Err(StoreError::Corrupt(format!(
                    "segment file size mismatch at {} (got {len}, want {seg_size})",
                    path.display()
                )));
            }
        }
        // SAFETY: the store requires single-process access to the base path;
        // nothing truncates or remaps the file while the segment is open.
        let map = unsafe { MmapMut::map_mut(&file)? };
        tracing::debug!(id, path = %path.display(), seg_size, created = create, "opened segment");
        Ok(Segment {
            id,
            seg_size,
            view: MapView::new(map),
            state: Mutex::new(SegmentState {
                log_end: 0,
                val_end: seg_size,
                free: HashMap::new(),
                truth: HashMap::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn seg_size(&self) -> u64 {
        self.seg_size
    }

    pub(crate) fn view(&self) -> &MapView {
        &self.view
    }

    // The state mutex is only ever taken by the single write-lock holder; a
    // poisoned guard just witnesses a panic there, and the maps themselves
    // are still structurally valid.
    fn state(&self) -> MutexGuard<'_, SegmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn log_end(&self) -> u64 {
        self.state().log_end
    }

    pub(crate) fn set_log_end(&self, v: u64) {
        self.state().log_end = v;
    }

    pub(crate) fn val_end(&self) -> u64 {
        self.state().val_end
    }

    pub(crate) fn set_val_end(&self, v: u64) {
        self.state().val_end = v;
    }

    /// Allocate a value block for an `n`-byte value, leaving room for
    /// `log_need` bytes of log record.
    ///
    /// Freed blocks of the same class are reused in LIFO order; otherwise
    /// the value region tail is bumped downward. Returns `None` when the
    /// segment cannot hold both the block and the accompanying log record.
    pub(crate) fn alloc(&self, n: u32, log_need: u64) -> Option<u64> {
        let class = size_class(n);
        if class == 0 {
            return None;
        }
        let mut st = self.state();
        if st.log_end + log_need > st.val_end {
            return None;
        }

        // Freelist path: pop until a live-free entry or the stack runs dry.
        let SegmentState { free, truth, .. } = &mut *st;
        if let Some(stack) = free.get_mut(&class) {
            while let Some(off) = stack.pop() {
                if truth.get(&off) == Some(&class) {
                    truth.remove(&off);
                    return Some(off);
                }
                // Stale hint: the offset was reused and re-freed elsewhere.
            }
        }

        // Tail path.
        if st.val_end < class {
            return None;
        }
        let new_val_end = st.val_end - class;
        if st.log_end + log_need > new_val_end {
            return None;
        }
        st.val_end = new_val_end;
        Some(new_val_end)
    }

    /// Return the block at `off` (holding an `n`-byte value) to the
    /// freelist. Double frees and zero-length frees are ignored.
    pub(crate) fn free_block(&self, off: u64, n: u32) {
        let class = size_class(n);
        if class == 0 {
            return;
        }
        let mut st = self.state();
        if st.truth.get(&off) == Some(&class) {
            return;
        }
        st.truth.insert(off, class);
        st.free.entry(class).or_default().push(off);
    }

    /// Assert that the block at `off` is in use (replay observed it live).
    pub(crate) fn mark_used(&self, off: u64) {
        self.state().truth.remove(&off);
    }

    /// Drop all freelist and truth state; replay re-derives it.
    pub(crate) fn reset_free_truth(&self) {
        let mut st = self.state();
        st.free.clear();
        st.truth.clear();
    }

    /// Flush the mapping to stable storage.
    pub(crate) fn sync(&self) -> StoreResult<()> {
        self.view.flush()?;
        Ok(())
    }
}
