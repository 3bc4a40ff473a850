//! On-disk record format: constants, header codec, checksum, size classes.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Header layout** (28 bytes, little-endian):
//!   `magic:u32 | version:u16 | flags:u16 | key_len:u16 | reserved:u16 |
//!   val_len:u32 | val_off:u64 | crc32:u32`.
//! - **Magic** is `0x4B564C47`, **version** is `1`.
//! - **Flags**: `1` = put, `2` = delete.
//! - **Checksum**: CRC-32/IEEE over the little-endian encoding of
//!   `flags | key_len | val_len | val_off` followed by the key bytes.
//!   Value bytes are *not* covered; the header's offset/length are
//!   authoritative for the value and are themselves protected.
//! - The reserved field is written as zero and ignored on read.

use byteorder::{ByteOrder, LittleEndian};

/// Magic value at the start of every log record.
pub const MAGIC: u32 = 0x4B56_4C47;
/// Current record format version.
pub const VERSION: u16 = 1;
/// Record flag: the record publishes a value for its key.
pub const FLAG_PUT: u16 = 1;
/// Record flag: the record deletes its key.
pub const FLAG_DELETE: u16 = 2;
/// Serialized header size in bytes.
pub const HEADER_SIZE: usize = 28;
/// Value block alignment; size classes are multiples of this.
pub const ALIGN: u64 = 16;

/// A decoded log record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic value (should equal [`MAGIC`]).
    pub magic: u32,
    /// Format version (should equal [`VERSION`]).
    pub version: u16,
    /// [`FLAG_PUT`] or [`FLAG_DELETE`].
    pub flags: u16,
    /// Key length in bytes (1..=65535 for a valid record).
    pub key_len: u16,
    /// Value length in bytes; 0 for a delete record.
    pub val_len: u32,
    /// Offset of the value block within the segment; 0 for a delete record.
    pub val_off: u64,
    /// CRC-32/IEEE over the fixed fields and the key bytes.
    pub crc32: u32,
}

/// Decode a header from the first [`HEADER_SIZE`] bytes of `data`.
///
/// The reserved field is skipped; no validation is performed here.
pub fn decode_header(data: &[u8]) -> Header {
    Header {
        magic: LittleEndian::read_u32(&data[0..4]),
        version: LittleEndian::read_u16(&data[4..6]),
        flags: LittleEndian::read_u16(&data[6..8]),
        key_len: LittleEndian::read_u16(&data[8..10]),
        val_len: LittleEndian::read_u32(&data[12..16]),
        val_off: LittleEndian::read_u64(&data[16..24]),
        crc32: LittleEndian::read_u32(&data[24..28]),
    }
}

/// Encode `h` into the first [`HEADER_SIZE`] bytes of `buf`.
pub fn encode_header(buf: &mut [u8], h: &Header) {
    LittleEndian::write_u32(&mut buf[0..4], h.magic);
    LittleEndian::write_u16(&mut buf[4..6], h.version);
    LittleEndian::write_u16(&mut buf[6..8], h.flags);
    LittleEndian::write_u16(&mut buf[8..10], h.key_len);
    LittleEndian::write_u16(&mut buf[10..12], 0);
    LittleEndian::write_u32(&mut buf[12..16], h.val_len);
    LittleEndian::write_u64(&mut buf[16..24], h.val_off);
    LittleEndian::write_u32(&mut buf[24..28], h.crc32);
}

/// CRC over the liveness-relevant fields plus the key bytes.
pub fn calc_crc(flags: u16, key_len: u16, val_len: u32, val_off: u64, key: &[u8]) -> u32 {
    let mut fixed = [0u8; 16];
    LittleEndian::write_u16(&mut fixed[0..2], flags);
    LittleEndian::write_u16(&mut fixed[2..4], key_len);
    LittleEndian::write_u32(&mut fixed[4..8], val_len);
    LittleEndian::write_u64(&mut fixed[8..16], val_off);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&fixed);
    hasher.update(key);
    hasher.finalize()
}

/// Round `n` up to its size class. A length of 0 has no class.
pub fn size_class(n: u32) -> u64 {
    if n == 0 {
        return 0;
    }
    (u64::from(n) + ALIGN - 1) / ALIGN * ALIGN
}
