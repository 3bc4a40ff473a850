//! Log replay: rebuild the index and per-segment region boundaries.
//!
//! ## Recovery posture
//!
//! Records are appended strictly in order and the per-record CRC is the
//! torn-write detector, so each segment is scanned forward and the scan
//! stops at the first anomaly: bad magic/version, zero key length, a record
//! or value range escaping its region, an unknown flag, or a CRC mismatch.
//! Scanning past a bad record would risk treating zero fill or a later
//! partial write as meaningful. Everything at or after the anomaly is
//! discarded implicitly — `log_end` stops short of it and future appends
//! overwrite it.
//!
//! Only the last segment re-derives freelist state; value blocks in earlier
//! segments are never reclaimed, so their freelists stay empty.

use crate::index::{Entry, ShardedIndex};
use crate::manager::SegmentManager;
use crate::record::{self, FLAG_DELETE, FLAG_PUT, HEADER_SIZE, MAGIC, VERSION};
use crate::segment::Segment;

/// Replay every segment's log region in id order, rebuilding `index` and
/// each segment's `log_end`, `val_end`, and (for the last segment) freelist
/// state.
///
/// Runs before the store handle is shared, or under the engine write lock;
/// there are no concurrent readers or writers.
pub(crate) fn rebuild(manager: &SegmentManager, index: &ShardedIndex) {
    index.clear();
    let segs = manager.segments();
    let Some(last) = segs.last() else { return };
    let last_id = last.id();
    for seg in segs {
        if seg.id() == last_id {
            seg.reset_free_truth();
        }
        replay_segment(seg, last_id, index);
    }
}

fn replay_segment(seg: &Segment, last_id: u32, index: &ShardedIndex) {
    let seg_size = seg.seg_size();
    let header_len = HEADER_SIZE as u64;
    let mut off = 0u64;
    let mut min_val_off = seg_size;
    let mut applied = 0u64;
    let mut hdr = [0u8; HEADER_SIZE];

    loop {
        // No room for another header before the value region.
        if off + header_len > min_val_off {
            break;
        }
        // SAFETY: replay is single-threaded and the range is in bounds.
        unsafe { seg.view().read(off, &mut hdr) };
        let h = record::decode_header(&hdr);
        if h.magic != MAGIC || h.version != VERSION || h.key_len == 0 {
            break;
        }
        let rec_len = header_len + u64::from(h.key_len);
        if off + rec_len > min_val_off {
            break;
        }
        if h.flags == FLAG_PUT {
            // The value must lie within the segment, strictly above this
            // record's own bytes.
            let val_len = u64::from(h.val_len);
            if h.val_off > seg_size || val_len > seg_size || h.val_off + val_len > seg_size {
                break;
            }
            if h.val_off < off + rec_len {
                break;
            }
        }
        let mut key = vec![0u8; usize::from(h.key_len)];
        // SAFETY: as above; `off + rec_len <= min_val_off <= seg_size`.
        unsafe { seg.view().read(off + header_len, &mut key) };
        if record::calc_crc(h.flags, h.key_len, h.val_len, h.val_off, &key) != h.crc32 {
            break;
        }

        let old = index.get(&key);
        match h.flags {
            FLAG_PUT => {
                if seg.id() == last_id {
                    if let Some(old) = old {
                        if old.seg_id == last_id {
                            seg.free_block(old.val_off, old.val_len);
                        }
                    }
                    seg.mark_used(h.val_off);
                }
                index.set(
                    &key,
                    Entry {
                        seg_id: seg.id(),
                        val_off: h.val_off,
                        val_len: h.val_len,
                    },
                );
                min_val_off = min_val_off.min(h.val_off);
            }
            FLAG_DELETE => {
                if seg.id() == last_id {
                    if let Some(old) = old {
                        if old.seg_id == last_id {
                            seg.free_block(old.val_off, old.val_len);
                        }
                    }
                }
                index.delete(&key);
            }
            _ => break,
        }
        applied += 1;
        off += rec_len;
    }

    // A non-zero tail past the cursor is a torn or corrupt record being
    // discarded; plain zero fill is just the unused remainder of the region.
    if off + header_len <= min_val_off {
        let mut probe = [0u8; HEADER_SIZE];
        // SAFETY: in bounds by the check above; replay is single-threaded.
        unsafe { seg.view().read(off, &mut probe) };
        if probe != [0u8; HEADER_SIZE] {
            tracing::warn!(
                segment = seg.id(),
                offset = off,
                "discarding invalid log tail"
            );
        }
    }

    seg.set_log_end(off);
    seg.set_val_end(min_val_off);
    tracing::debug!(
        segment = seg.id(),
        records = applied,
        log_end = off,
        val_end = min_val_off,
        "replayed segment"
    );
}
