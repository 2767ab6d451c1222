//! Extendible-hashing directory.
//!
//! `2^bits` bucket offsets. The entry for a hash is chosen by its top `bits`
//! bits. A bucket with `bucket_bits` local bits is named by a contiguous run
//! of `2^(bits - bucket_bits)` entries.

use crate::hash::dir_index;
use crate::{LayoutError, DIR_ENTRY_BYTES};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    bits: u32,
    entries: Vec<u64>,
}

impl Directory {
    /// A directory of `2^bits` entries all naming `bucket`.
    #[must_use]
    pub fn new(bits: u32, bucket: u64) -> Self {
        Self {
            bits,
            entries: vec![bucket; 1usize << bits],
        }
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u32 {
        (self.entries.len() * DIR_ENTRY_BYTES) as u32
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<u64> {
        self.entries.get(index).copied()
    }

    #[must_use]
    pub fn entries(&self) -> &[u64] {
        &self.entries
    }

    /// Directory index responsible for `hash`.
    #[must_use]
    pub fn index_for(&self, hash: u32) -> usize {
        dir_index(hash, self.bits)
    }

    /// Points every entry in `range` at `bucket`.
    pub fn set_range(&mut self, range: Range<usize>, bucket: u64) {
        for entry in &mut self.entries[range] {
            *entry = bucket;
        }
    }

    /// Same mapping with one more bit: entry `i` becomes `2i` and `2i + 1`.
    #[must_use]
    pub fn doubled(&self) -> Self {
        let entries = self.entries.iter().flat_map(|&adr| [adr, adr]).collect();
        Self {
            bits: self.bits + 1,
            entries,
        }
    }

    /// Distinct bucket offsets in ascending order.
    #[must_use]
    pub fn unique_buckets(&self) -> Vec<u64> {
        let mut adrs = self.entries.clone();
        adrs.sort_unstable();
        adrs.dedup();
        adrs
    }

    /// Range of entries that name the same bucket as `index`, assuming the
    /// bucket has `bucket_bits` local bits.
    #[must_use]
    pub fn run_for(&self, index: usize, bucket_bits: u32) -> Range<usize> {
        let shift = self.bits.saturating_sub(bucket_bits);
        let start = (index >> shift) << shift;
        start..start + (1usize << shift)
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entries.len() * DIR_ENTRY_BYTES);
        for &adr in &self.entries {
            // Writing into a Vec cannot fail.
            let _ = buf.write_u64::<LittleEndian>(adr);
        }
        buf
    }

    /// Decodes a directory of `2^bits` entries.
    pub fn decode(buf: &[u8], bits: u32) -> Result<Self, LayoutError> {
        let count = 1usize << bits;
        if buf.len() < count * DIR_ENTRY_BYTES {
            return Err(LayoutError::Corrupt(format!(
                "directory is {} bytes, expected {}",
                buf.len(),
                count * DIR_ENTRY_BYTES
            )));
        }
        let mut cursor = buf;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(cursor.read_u64::<LittleEndian>()?);
        }
        Ok(Self { bits, entries })
    }
}
