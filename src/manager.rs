//! Segment discovery, creation, and lifecycle.
//!
//! Segment files live at `<base>.<ddd>` (three-digit zero-padded decimal id)
//! and are discovered by probing ids upward from 0 until the first missing
//! file. Ids are therefore contiguous by construction and never reused.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StoreResult;
use crate::segment::Segment;

/// Render the file path for segment `id` under `base`.
fn seg_path(base: &Path, id: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{id:03}"));
    PathBuf::from(name)
}

/// Ordered list of open segments under one base path prefix.
pub(crate) struct SegmentManager {
    base: PathBuf,
    seg_size: u64,
    segs: Vec<Arc<Segment>>,
}

impl SegmentManager {
    pub(crate) fn new(base: PathBuf, seg_size: u64) -> Self {
        Self {
            base,
            seg_size,
            segs: Vec::new(),
        }
    }

    /// Open every existing `<base>.<id>` file in id order, stopping at the
    /// first missing one. Any other stat error is propagated.
    pub(crate) fn open_base(&mut self) -> StoreResult<()> {
        for id in 0u32.. {
            let path = seg_path(&self.base, id);
            match std::fs::metadata(&path) {
                Ok(_) => {
                    let seg = Segment::open(&path, id, self.seg_size, false)?;
                    self.segs.push(Arc::new(seg));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Create segment 0 if the store has no segments yet.
    pub(crate) fn ensure_one(&mut self) -> StoreResult<()> {
        if !self.segs.is_empty() {
            return Ok(());
        }
        let seg = Segment::open(&seg_path(&self.base, 0), 0, self.seg_size, true)?;
        self.segs.push(Arc::new(seg));
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    pub(crate) fn segments(&self) -> &[Arc<Segment>] {
        &self.segs
    }

    /// The segment that currently receives writes, if any.
    pub(crate) fn last(&self) -> Option<&Arc<Segment>> {
        self.segs.last()
    }

    /// Create the next segment and append it to the list. The list is left
    /// unchanged on failure.
    pub(crate) fn append_new(&mut self) -> StoreResult<Arc<Segment>> {
        let id = self.segs.len() as u32;
        let seg = Arc::new(Segment::open(&seg_path(&self.base, id), id, self.seg_size, true)?);
        tracing::debug!(id, "appended new segment");
        self.segs.push(Arc::clone(&seg));
        Ok(seg)
    }

    /// Flush and drop all segments in order. Returns the first error
    /// encountered while still attempting the rest.
    pub(crate) fn close(&mut self) -> StoreResult<()> {
        let mut first_err = None;
        for seg in self.segs.drain(..) {
            if let Err(e) = seg.sync() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
