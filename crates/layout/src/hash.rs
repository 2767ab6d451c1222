//! Key hashing.
//!
//! The hash is 31 bits wide. Its top `dir_bits` bits pick the directory entry
//! and the value modulo the slot count picks the home slot inside a bucket.
//! The function is part of the file format: changing it orphans every key
//! already stored.

/// Hashes `key` to a 31-bit value.
///
/// Each byte is sign-extended before it is shifted into place, so bytes in
/// `0x80..=0xFF` contribute negative terms. Files written by other
/// implementations of this format depend on that.
#[must_use]
pub fn hash(key: &[u8]) -> u32 {
    let mut value = 0x238F_13AFu32.wrapping_mul(key.len() as u32);
    for (index, &byte) in key.iter().enumerate() {
        let shift = (index * 5 % 24) as u32;
        let term = ((byte as i8 as i32) << shift) as u32;
        value = value.wrapping_add(term) & 0x7FFF_FFFF;
    }
    1_103_515_243u32.wrapping_mul(value).wrapping_add(12345) & 0x7FFF_FFFF
}

/// Directory index for `hash` in a directory of `2^dir_bits` entries.
#[must_use]
pub fn dir_index(hash: u32, dir_bits: u32) -> usize {
    (hash >> (31 - dir_bits)) as usize
}
