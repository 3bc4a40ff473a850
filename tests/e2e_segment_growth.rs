//! End-to-end tests for the segment growth policy and space exhaustion.

use mapkv::{Store, StoreError};

fn seg_file(base: &std::path::Path, id: u32) -> std::path::PathBuf {
    base.with_file_name(format!("db.{id:03}"))
}

#[test]
fn value_too_big_for_any_segment_is_no_space() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("db");
    let store = Store::open(&base, 40).unwrap();

    // 40 bytes can never hold a 29-byte record plus a 16-byte block.
    assert!(matches!(store.put(b"k", b"value"), Err(StoreError::NoSpace)));

    // The failed put must not leave a half-grown store behind: only the
    // segments it probed exist, all of the configured size.
    assert_eq!(std::fs::metadata(seg_file(&base, 0)).unwrap().len(), 40);
    store.close().unwrap();
}

#[test]
fn exhausting_a_segment_creates_the_next_one() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("db");
    let store = Store::open(&base, 4096).unwrap();

    let mut i = 0u32;
    while !seg_file(&base, 1).exists() {
        store
            .put(format!("key:{i:04}").as_bytes(), &[0xEEu8; 128])
            .unwrap();
        i += 1;
        assert!(i < 1000, "growth never happened");
    }

    for id in 0..2 {
        assert_eq!(std::fs::metadata(seg_file(&base, id)).unwrap().len(), 4096);
    }
    // Everything written on both sides of the boundary is still readable.
    for j in 0..i {
        assert_eq!(
            store.get(format!("key:{j:04}").as_bytes()).unwrap().unwrap(),
            vec![0xEEu8; 128],
        );
    }
    store.close().unwrap();
}

#[test]
fn segment_files_are_contiguous_and_never_removed() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("db");
    let store = Store::open(&base, 4096).unwrap();

    for i in 0..60u32 {
        store
            .put(format!("key:{i:04}").as_bytes(), &[1u8; 200])
            .unwrap();
    }
    let count_before = (0..)
        .take_while(|id| seg_file(&base, *id).exists())
        .count();
    assert!(count_before >= 2);

    // Deleting everything reclaims blocks but never removes segments.
    for i in 0..60u32 {
        store.delete(format!("key:{i:04}").as_bytes()).unwrap();
    }
    let count_after = (0..).take_while(|id| seg_file(&base, *id).exists()).count();
    assert!(count_after >= count_before);

    // Ids are contiguous from zero: the file after the last is missing.
    assert!(!seg_file(&base, count_after as u32).exists());
    store.close().unwrap();
}

#[test]
fn delete_path_grows_when_the_log_region_is_full() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("db");
    let store = Store::open(&base, 4096).unwrap();

    store.put(b"victim", &[7u8; 16]).unwrap();
    // Burn the remaining log space with deletes of a long absent key; each
    // appends a record without consuming value space.
    let long_key = vec![b'x'; 300];
    while !seg_file(&base, 1).exists() {
        store.delete(&long_key).unwrap();
    }

    // The store stayed consistent across the delete-driven growth.
    assert_eq!(store.get(b"victim").unwrap().unwrap(), vec![7u8; 16]);
    store.close().unwrap();
}

#[test]
fn writes_after_growth_target_the_new_segment_only() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("db");
    let store = Store::open(&base, 4096).unwrap();

    // Fill segment 0 past the point where a large value fits.
    let mut i = 0u32;
    while !seg_file(&base, 1).exists() {
        store
            .put(format!("fill:{i:04}").as_bytes(), &[0u8; 512])
            .unwrap();
        i += 1;
    }

    // Overwriting a key whose old block lives in segment 0 must not free
    // that block (it belongs to a sealed segment); the new value is served
    // from the new segment.
    store.put(b"fill:0000", b"rewritten").unwrap();
    assert_eq!(
        store.get(b"fill:0000").unwrap().as_deref(),
        Some(&b"rewritten"[..])
    );
    store.close().unwrap();

    // And the replacement survives replay.
    let store = Store::open(&base, 4096).unwrap();
    assert_eq!(
        store.get(b"fill:0000").unwrap().as_deref(),
        Some(&b"rewritten"[..])
    );
    store.close().unwrap();
}
