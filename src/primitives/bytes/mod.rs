#![forbid(unsafe_code)]
//! Fixed-width little-endian field codecs for the on-disk records.

const U32_LEN: usize = core::mem::size_of::<u32>();
const U64_LEN: usize = core::mem::size_of::<u64>();

/// Writes `v` little-endian into the first eight bytes of `dst`.
pub fn put_u64_le(dst: &mut [u8], v: u64) {
    assert!(dst.len() >= U64_LEN, "destination too small for u64");
    dst[..U64_LEN].copy_from_slice(&v.to_le_bytes());
}

/// Reads a little-endian u64 from the first eight bytes of `src`.
pub fn get_u64_le(src: &[u8]) -> u64 {
    let head = src
        .get(..U64_LEN)
        .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
    let mut bytes = [0u8; U64_LEN];
    bytes.copy_from_slice(head);
    u64::from_le_bytes(bytes)
}

/// Writes `v` little-endian into the first four bytes of `dst`.
pub fn put_u32_le(dst: &mut [u8], v: u32) {
    assert!(dst.len() >= U32_LEN, "destination too small for u32");
    dst[..U32_LEN].copy_from_slice(&v.to_le_bytes());
}

/// Reads a little-endian u32 from the first four bytes of `src`.
pub fn get_u32_le(src: &[u8]) -> u32 {
    let head = src
        .get(..U32_LEN)
        .unwrap_or_else(|| panic!("u32 source shorter than 4 bytes (have {})", src.len()));
    let mut bytes = [0u8; U32_LEN];
    bytes.copy_from_slice(head);
    u32::from_le_bytes(bytes)
}
