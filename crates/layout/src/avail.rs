//! Free-space bookkeeping structures.
//!
//! Free ranges live in three places: the table embedded in the header, the
//! small table embedded in every bucket, and a stack of overflow blocks
//! chained from the header. All three use [`AvailTable`]: a bounded list kept
//! in ascending order of size so that the first fit is also the best fit.
//!
//! ## Encoding
//!
//! ```text
//! element:         [adr: u64][size: u32]
//! block / header:  [capacity: u32][count: u32][next: u64][element; capacity]
//! ```
//!
//! Unused element slots are written as zeros.

use crate::{LayoutError, AVAIL_ELEM_BYTES, AVAIL_PREAMBLE_BYTES, IGNORE_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A free range `[adr, adr + size)` inside the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailElem {
    /// Length of the range in bytes.
    pub size: u32,
    /// File offset where the range starts.
    pub adr: u64,
}

impl AvailElem {
    #[must_use]
    pub fn new(adr: u64, size: u32) -> Self {
        Self { size, adr }
    }

    /// Offset one past the last byte of the range.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.adr + u64::from(self.size)
    }

    pub(crate) fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u64::<LittleEndian>(self.adr)?;
        w.write_u32::<LittleEndian>(self.size)
    }

    pub(crate) fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let adr = r.read_u64::<LittleEndian>()?;
        let size = r.read_u32::<LittleEndian>()?;
        Ok(Self { size, adr })
    }
}

/// Bounded list of free ranges sorted by ascending size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailTable {
    capacity: usize,
    entries: Vec<AvailElem>,
}

impl AvailTable {
    /// Creates an empty table that can hold `capacity` ranges.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Entries in ascending size order.
    #[must_use]
    pub fn entries(&self) -> &[AvailElem] {
        &self.entries
    }

    /// Sum of the sizes of every tracked range.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.size)).sum()
    }

    /// Removes and returns the smallest range of at least `size` bytes.
    pub fn take_fit(&mut self, size: u32) -> Option<AvailElem> {
        let index = self.entries.iter().position(|e| e.size >= size)?;
        Some(self.entries.remove(index))
    }

    /// Removes and returns the smallest range.
    pub fn take_first(&mut self) -> Option<AvailElem> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Removes and returns the largest range.
    pub fn take_last(&mut self) -> Option<AvailElem> {
        self.entries.pop()
    }

    /// Adds a free range.
    ///
    /// Ranges of [`IGNORE_SIZE`] bytes or fewer are dropped. With `merge`, a
    /// range touching an existing entry on either side is folded into it.
    /// Returns `false` only when the element had to be stored and the table
    /// is full; the caller then owns the range again.
    pub fn insert(&mut self, elem: AvailElem, merge: bool) -> bool {
        if elem.size <= IGNORE_SIZE {
            return true;
        }

        if merge {
            let touching = self
                .entries
                .iter()
                .position(|e| e.end() == elem.adr || elem.end() == e.adr);
            if let Some(index) = touching {
                let mut merged = self.entries.remove(index);
                if merged.end() != elem.adr {
                    merged.adr = elem.adr;
                }
                merged.size = merged.size.saturating_add(elem.size);
                self.insert_sorted(merged);
                return true;
            }
        }

        if self.is_full() {
            return false;
        }
        self.insert_sorted(elem);
        true
    }

    /// Moves every odd-indexed entry out and keeps the even-indexed ones.
    ///
    /// Both halves stay sorted. Used when a full table spills into an
    /// overflow block.
    pub fn split_odd(&mut self) -> Vec<AvailElem> {
        let mut kept = Vec::with_capacity(self.capacity);
        let mut moved = Vec::with_capacity(self.entries.len() / 2);
        for (index, elem) in self.entries.drain(..).enumerate() {
            if index % 2 == 1 {
                moved.push(elem);
            } else {
                kept.push(elem);
            }
        }
        self.entries = kept;
        moved
    }

    /// Replaces the contents with `entries`, which must fit and be sorted.
    pub fn replace_entries(&mut self, mut entries: Vec<AvailElem>) {
        entries.sort_by_key(|e| e.size);
        entries.truncate(self.capacity);
        self.entries = entries;
    }

    fn insert_sorted(&mut self, elem: AvailElem) {
        let index = self
            .entries
            .iter()
            .position(|e| e.size >= elem.size)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, elem);
    }

    /// Writes `capacity` element slots, zero-filling the unused tail.
    pub(crate) fn write_entries<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for elem in &self.entries {
            elem.write_to(w)?;
        }
        for _ in self.entries.len()..self.capacity {
            AvailElem::default().write_to(w)?;
        }
        Ok(())
    }

    /// Reads `capacity` element slots and keeps the first `count`.
    pub(crate) fn read_entries<R: Read>(
        r: &mut R,
        capacity: usize,
        count: usize,
    ) -> Result<Self, LayoutError> {
        if count > capacity {
            return Err(LayoutError::Corrupt(format!(
                "avail count {count} exceeds capacity {capacity}"
            )));
        }
        let mut entries = Vec::with_capacity(capacity);
        for index in 0..capacity {
            let elem = AvailElem::read_from(r)?;
            if index < count {
                entries.push(elem);
            }
        }
        Ok(Self { capacity, entries })
    }
}

/// An avail table plus the offset of the next overflow block.
///
/// This is both the shape of the table embedded in the header and of every
/// block on the overflow stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailBlock {
    /// Offset of the next block on the overflow stack, 0 if none.
    pub next: u64,
    pub table: AvailTable,
}

impl AvailBlock {
    #[must_use]
    pub fn new(capacity: usize, next: u64) -> Self {
        Self {
            next,
            table: AvailTable::new(capacity),
        }
    }

    /// Encoded size of a block holding `capacity` elements.
    #[must_use]
    pub fn encoded_len(capacity: usize) -> usize {
        AVAIL_PREAMBLE_BYTES + capacity * AVAIL_ELEM_BYTES
    }

    /// Capacity of an overflow block that receives spill from a table of
    /// `table_capacity` elements.
    #[must_use]
    pub fn spill_capacity(table_capacity: usize) -> usize {
        table_capacity / 2
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.table.capacity() as u32)?;
        w.write_u32::<LittleEndian>(self.table.len() as u32)?;
        w.write_u64::<LittleEndian>(self.next)?;
        self.table.write_entries(w)
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::encoded_len(self.table.capacity()));
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Decodes a block whose capacity may not exceed `max_capacity`.
    pub fn read_from<R: Read>(r: &mut R, max_capacity: usize) -> Result<Self, LayoutError> {
        let capacity = r.read_u32::<LittleEndian>()? as usize;
        let count = r.read_u32::<LittleEndian>()? as usize;
        let next = r.read_u64::<LittleEndian>()?;
        if capacity > max_capacity {
            return Err(LayoutError::Corrupt(format!(
                "avail capacity {capacity} exceeds limit {max_capacity}"
            )));
        }
        let table = AvailTable::read_entries(r, capacity, count)?;
        Ok(Self { next, table })
    }

    pub fn decode(buf: &[u8], max_capacity: usize) -> Result<Self, LayoutError> {
        let mut cursor = buf;
        Self::read_from(&mut cursor, max_capacity)
    }
}
