#![no_main]

use libfuzzer_sys::fuzz_target;
use mapkv::Store;

const SEG_SIZE: u64 = 4096;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as the contents of an existing segment file: replay
    // must neither panic nor reject the open, and the store must keep
    // accepting writes afterwards.
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("db");
    let seg = base.with_file_name("db.000");
    let mut contents = vec![0u8; SEG_SIZE as usize];
    let n = data.len().min(contents.len());
    contents[..n].copy_from_slice(&data[..n]);
    std::fs::write(&seg, &contents).unwrap();

    let store = Store::open(&base, SEG_SIZE).unwrap();
    let _ = store.get(b"anything");
    let _ = store.put(b"post", b"scan");
    store.close().unwrap();
});
