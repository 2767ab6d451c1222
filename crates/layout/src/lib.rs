//! # Layout - on-disk structures of a BucketKV file
//!
//! A database is one file split into fixed-size blocks. The first block holds
//! the [`FileHeader`]; everything else is reached through offsets stored in it.
//!
//! ```text
//! offset 0          block_size        2*block_size      3*block_size
//! ┌─────────────────┬─────────────────┬─────────────────┬──────────────── ...
//! │ header          │ directory       │ bucket          │ free / records
//! │ + avail table   │ 2^dir_bits u64  │ slots + avail   │
//! └─────────────────┴─────────────────┴─────────────────┴──────────────── ...
//! ```
//!
//! The layout of a freshly created file is shown; after splits the directory
//! and buckets move to wherever the allocator places them.
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                                   |
//! |---------------|-----------------------------------------------------------|
//! | [`hash`]      | 31-bit key hash and directory/slot index helpers          |
//! | [`avail`]     | Free-range elements, sorted avail tables, overflow blocks |
//! | [`header`]    | File header codec and magic-number classification         |
//! | [`bucket`]    | Bucket page codec and the open-addressing slot table      |
//! | [`directory`] | Extendible-hashing directory                              |
//!
//! All integers are little-endian and all file offsets are 64-bit.

pub mod avail;
pub mod bucket;
pub mod directory;
pub mod hash;
pub mod header;

use std::io;
use thiserror::Error;

pub use avail::{AvailBlock, AvailElem, AvailTable};
pub use bucket::{BucketElement, HashBucket, SlotTable};
pub use directory::Directory;
pub use hash::hash;
pub use header::FileHeader;

/// Magic number written to every file this crate creates (64-bit offsets).
pub const MAGIC: u32 = 0x1357_9acf;
/// Magic of files laid out with 32-bit offsets.
pub const MAGIC_32: u32 = 0x1357_9acd;
/// Magic of the oldest on-disk revision.
pub const MAGIC_ORIGINAL: u32 = 0x1357_9ace;

/// Freed ranges of this many bytes or fewer are dropped instead of tracked.
pub const IGNORE_SIZE: u32 = 4;
/// Number of leading key bytes copied into each bucket slot.
pub const SMALL: usize = 4;
/// Capacity of the avail table embedded in every bucket.
pub const BUCKET_AVAIL: usize = 6;
/// Bucket cache capacity used when none is configured.
pub const DEFAULT_CACHE_SIZE: usize = 100;
/// Smallest block size a file may be created with.
pub const MIN_BLOCK_SIZE: u32 = 512;

/// Encoded size of one [`AvailElem`]: `[adr: u64][size: u32]`.
pub const AVAIL_ELEM_BYTES: usize = 8 + 4;
/// Encoded size of an avail table preamble: `[capacity: u32][count: u32][next: u64]`.
pub const AVAIL_PREAMBLE_BYTES: usize = 4 + 4 + 8;
/// Encoded size of the fixed header fields preceding the avail table.
pub const HEADER_FIXED_BYTES: usize = 4 + 4 + 8 + 4 + 4 + 4 + 4 + 8;
/// Bytes of the header that must be read before the rest can be interpreted.
pub const HEADER_PREFIX_BYTES: usize = HEADER_FIXED_BYTES + AVAIL_PREAMBLE_BYTES;
/// Encoded size of a bucket page preamble: avail count, avail table, bits, count.
pub const BUCKET_HEADER_BYTES: usize = 4 + BUCKET_AVAIL * AVAIL_ELEM_BYTES + 4 + 4;
/// Encoded size of one bucket slot.
pub const BUCKET_ELEMENT_BYTES: usize = 4 + SMALL + 8 + 4 + 4;
/// Encoded size of one directory entry.
pub const DIR_ENTRY_BYTES: usize = 8;

/// Errors produced while decoding on-disk structures.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The header does not start with any known magic number.
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// The magic number is a known one with its bytes reversed.
    #[error("file was written with the opposite byte order")]
    ByteSwapped,

    /// The magic number belongs to a layout with a different offset width.
    #[error("file uses an unsupported offset width")]
    BadFileOffset,

    /// The block size is unusable for this layout.
    #[error("unsupported block size {0}")]
    BlockSize(u32),

    /// A structure decoded but violates a layout rule.
    #[error("corrupt structure: {0}")]
    Corrupt(String),

    /// The buffer handed to a decoder was too short.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Number of slots a bucket page of `block_size` bytes holds.
#[must_use]
pub fn bucket_elems_for(block_size: u32) -> u32 {
    ((block_size as usize).saturating_sub(BUCKET_HEADER_BYTES) / BUCKET_ELEMENT_BYTES) as u32
}

/// Capacity of the header avail table for a given block size.
#[must_use]
pub fn header_avail_capacity(block_size: u32) -> u32 {
    ((block_size as usize).saturating_sub(HEADER_PREFIX_BYTES) / AVAIL_ELEM_BYTES) as u32
}

#[cfg(test)]
mod tests;
