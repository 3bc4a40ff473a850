//! Property-based fault tests: corrupting a single log byte loses only the
//! records at or after the corruption point.

use proptest::prelude::*;

use mapkv::Store;

const HEADER_SIZE: usize = 28;
const SEG_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone)]
struct Rec {
    key: Vec<u8>,
    value: Vec<u8>,
}

fn arb_records() -> impl Strategy<Value = Vec<Rec>> {
    // Distinct keys (the index prefix guarantees it), varied lengths.
    prop::collection::vec((1usize..40, 1usize..100), 1..25).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (key_pad, val_len))| Rec {
                key: format!("{i:04}-{}", "k".repeat(key_pad)).into_bytes(),
                value: vec![(i % 251) as u8 + 1; val_len],
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        // Integration-test crates don't have a stable lib.rs/main.rs path for
        // proptest's persistence mode. Disable it; we still get shrinking.
        failure_persistence: None,
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn single_byte_corruption_loses_only_the_tail(
        records in arb_records(),
        rec_choice in any::<prop::sample::Index>(),
        byte_choice in any::<prop::sample::Index>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("db");
        {
            let store = Store::open(&base, SEG_SIZE).unwrap();
            for r in &records {
                store.put(&r.key, &r.value).unwrap();
            }
            store.close().unwrap();
        }

        // Pick a record and a byte within it, skipping the reserved field
        // (bytes 10..12): it is neither validated nor checksummed, so
        // flipping it legitimately loses nothing.
        let target = rec_choice.index(records.len());
        let offsets: Vec<u64> = records
            .iter()
            .scan(0u64, |off, r| {
                let this = *off;
                *off += (HEADER_SIZE + r.key.len()) as u64;
                Some(this)
            })
            .collect();
        let rec_len = HEADER_SIZE + records[target].key.len();
        let flippable: Vec<usize> = (0..rec_len).filter(|p| *p != 10 && *p != 11).collect();
        let pos = offsets[target] + flippable[byte_choice.index(flippable.len())] as u64;

        {
            use std::io::{Read, Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(base.with_file_name("db.000"))
                .unwrap();
            f.seek(SeekFrom::Start(pos)).unwrap();
            let mut b = [0u8; 1];
            f.read_exact(&mut b).unwrap();
            f.seek(SeekFrom::Start(pos)).unwrap();
            f.write_all(&[b[0] ^ 0xFF]).unwrap();
        }

        let store = Store::open(&base, SEG_SIZE).unwrap();
        for (i, r) in records.iter().enumerate() {
            let got = store.get(&r.key).unwrap();
            if i < target {
                prop_assert_eq!(got.as_deref(), Some(&r.value[..]));
            } else {
                prop_assert_eq!(got, None);
            }
        }

        // The store is still writable after discarding the tail.
        store.put(b"post-corruption", b"ok").unwrap();
        let post_corruption = store.get(b"post-corruption").unwrap();
        prop_assert_eq!(post_corruption.as_deref(), Some(&b"ok"[..]));
        store.close().unwrap();
    }

    #[test]
    fn zeroed_suffix_of_the_log_keeps_the_prefix(
        records in arb_records(),
        cut_choice in any::<prop::sample::Index>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("db");
        {
            let store = Store::open(&base, SEG_SIZE).unwrap();
            for r in &records {
                store.put(&r.key, &r.value).unwrap();
            }
            store.close().unwrap();
        }

        let offsets: Vec<u64> = records
            .iter()
            .scan(0u64, |off, r| {
                let this = *off;
                *off += (HEADER_SIZE + r.key.len()) as u64;
                Some(this)
            })
            .collect();
        let log_end = offsets.last().unwrap() + (HEADER_SIZE + records.last().unwrap().key.len()) as u64;

        // Zero out the log from the start of a random record to the end of
        // the log region (a torn multi-record write).
        let cut = cut_choice.index(records.len());
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .open(base.with_file_name("db.000"))
                .unwrap();
            f.seek(SeekFrom::Start(offsets[cut])).unwrap();
            f.write_all(&vec![0u8; (log_end - offsets[cut]) as usize]).unwrap();
        }

        let store = Store::open(&base, SEG_SIZE).unwrap();
        for (i, r) in records.iter().enumerate() {
            let got = store.get(&r.key).unwrap();
            if i < cut {
                prop_assert_eq!(got.as_deref(), Some(&r.value[..]));
            } else {
                prop_assert_eq!(got, None);
            }
        }
        store.close().unwrap();
    }
}
