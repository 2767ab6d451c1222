//! File header codec.
//!
//! ```text
//! [magic: u32][block_size: u32][dir: u64][dir_size: u32][dir_bits: u32]
//! [bucket_size: u32][bucket_elems: u32][next_block: u64]
//! [avail capacity: u32][avail count: u32][avail next: u64][avail elements ...]
//! ```
//!
//! The header always occupies exactly one block at offset 0 and is rewritten
//! in full whenever it changes.

use crate::avail::AvailBlock;
use crate::{
    bucket_elems_for, header_avail_capacity, LayoutError, DIR_ENTRY_BYTES, HEADER_PREFIX_BYTES,
    MAGIC, MAGIC_32, MAGIC_ORIGINAL, MIN_BLOCK_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Directory size a new file starts from before doubling up to the block size.
const INITIAL_DIR_BITS: u32 = 3;

/// The in-memory form of block 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub block_size: u32,
    /// Offset of the directory.
    pub dir: u64,
    /// Directory size in bytes.
    pub dir_size: u32,
    /// log2 of the number of directory entries.
    pub dir_bits: u32,
    pub bucket_size: u32,
    pub bucket_elems: u32,
    /// Offset one past the last block handed out so far.
    pub next_block: u64,
    /// File-wide avail table and the head of the overflow stack.
    pub avail: AvailBlock,
}

impl FileHeader {
    /// Header of a brand new file.
    ///
    /// The directory fills exactly block 1, the first bucket sits in block 2,
    /// and block 3 is left for the caller to seed as free space.
    pub fn new(block_size: u32) -> Result<Self, LayoutError> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(LayoutError::BlockSize(block_size));
        }

        let mut dir_bits = INITIAL_DIR_BITS;
        let mut dir_size = (DIR_ENTRY_BYTES as u32) << dir_bits;
        while dir_size < block_size {
            dir_size <<= 1;
            dir_bits += 1;
        }
        if dir_size != block_size {
            return Err(LayoutError::BlockSize(block_size));
        }

        let bs = u64::from(block_size);
        Ok(Self {
            block_size,
            dir: bs,
            dir_size,
            dir_bits,
            bucket_size: block_size,
            bucket_elems: bucket_elems_for(block_size),
            next_block: 4 * bs,
            avail: AvailBlock::new(header_avail_capacity(block_size) as usize, 0),
        })
    }

    /// Number of directory entries.
    #[must_use]
    pub fn dir_entries(&self) -> usize {
        self.dir_size as usize / DIR_ENTRY_BYTES
    }

    /// Checks `magic` against the known magic numbers.
    pub fn classify_magic(magic: u32) -> Result<(), LayoutError> {
        match magic {
            MAGIC => Ok(()),
            MAGIC_32 | MAGIC_ORIGINAL => Err(LayoutError::BadFileOffset),
            m if [MAGIC, MAGIC_32, MAGIC_ORIGINAL].contains(&m.swap_bytes()) => {
                Err(LayoutError::ByteSwapped)
            }
            m => Err(LayoutError::BadMagic(m)),
        }
    }

    /// Validates the magic in the first [`HEADER_PREFIX_BYTES`] of a file and
    /// returns the block size recorded there.
    pub fn peek_block_size(prefix: &[u8]) -> Result<u32, LayoutError> {
        let mut cursor = prefix;
        let magic = cursor.read_u32::<LittleEndian>()?;
        Self::classify_magic(magic)?;
        let block_size = cursor.read_u32::<LittleEndian>()?;
        if block_size < MIN_BLOCK_SIZE || !block_size.is_power_of_two() {
            return Err(LayoutError::BlockSize(block_size));
        }
        Ok(block_size)
    }

    /// Decodes and validates a complete header block.
    pub fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < HEADER_PREFIX_BYTES {
            return Err(LayoutError::Corrupt(format!(
                "header truncated to {} bytes",
                buf.len()
            )));
        }
        let block_size = Self::peek_block_size(buf)?;
        if buf.len() < block_size as usize {
            return Err(LayoutError::Corrupt(format!(
                "header block is {} bytes, expected {block_size}",
                buf.len()
            )));
        }

        let mut cursor = &buf[8..];
        let dir = cursor.read_u64::<LittleEndian>()?;
        let dir_size = cursor.read_u32::<LittleEndian>()?;
        let dir_bits = cursor.read_u32::<LittleEndian>()?;
        let bucket_size = cursor.read_u32::<LittleEndian>()?;
        let bucket_elems = cursor.read_u32::<LittleEndian>()?;
        let next_block = cursor.read_u64::<LittleEndian>()?;
        let avail = AvailBlock::read_from(&mut cursor, header_avail_capacity(block_size) as usize)?;

        let header = Self {
            block_size,
            dir,
            dir_size,
            dir_bits,
            bucket_size,
            bucket_elems,
            next_block,
            avail,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), LayoutError> {
        let corrupt = |what: String| -> Result<(), LayoutError> { Err(LayoutError::Corrupt(what)) };
        if self.bucket_size != self.block_size {
            return corrupt(format!(
                "bucket size {} differs from block size {}",
                self.bucket_size, self.block_size
            ));
        }
        if self.bucket_elems != bucket_elems_for(self.block_size) {
            return corrupt(format!("bucket holds {} slots", self.bucket_elems));
        }
        if self.dir_bits > 31 || u64::from(self.dir_size) != (DIR_ENTRY_BYTES as u64) << self.dir_bits {
            return corrupt(format!(
                "directory of {} bytes does not match {} bits",
                self.dir_size, self.dir_bits
            ));
        }
        if self.dir < u64::from(self.block_size) || self.next_block < 3 * u64::from(self.block_size) {
            return corrupt(format!(
                "directory at {} or next block {} overlaps the header",
                self.dir, self.next_block
            ));
        }
        Ok(())
    }

    /// Encodes the header padded to one full block.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.block_size as usize);
        // Writing into a Vec cannot fail.
        let _ = self.write_fields(&mut buf);
        buf.resize(self.block_size as usize, 0);
        buf
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(MAGIC)?;
        buf.write_u32::<LittleEndian>(self.block_size)?;
        buf.write_u64::<LittleEndian>(self.dir)?;
        buf.write_u32::<LittleEndian>(self.dir_size)?;
        buf.write_u32::<LittleEndian>(self.dir_bits)?;
        buf.write_u32::<LittleEndian>(self.bucket_size)?;
        buf.write_u32::<LittleEndian>(self.bucket_elems)?;
        buf.write_u64::<LittleEndian>(self.next_block)?;
        self.avail.write_to(buf)
    }
}
