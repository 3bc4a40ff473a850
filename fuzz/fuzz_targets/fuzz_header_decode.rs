#![no_main]

use libfuzzer_sys::fuzz_target;
use mapkv::record::{self, HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    if data.len() < HEADER_SIZE {
        return;
    }
    let h = record::decode_header(data);
    // Re-encoding a decoded header must be stable up to the reserved field,
    // which normalizes to zero.
    let mut buf = [0u8; HEADER_SIZE];
    record::encode_header(&mut buf, &h);
    assert_eq!(&buf[0..10], &data[0..10]);
    assert_eq!(&buf[10..12], &[0, 0]);
    assert_eq!(&buf[12..HEADER_SIZE], &data[12..HEADER_SIZE]);
});
