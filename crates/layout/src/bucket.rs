//! Bucket pages and the open-addressing slot table inside them.
//!
//! ```text
//! [av_count: u32][avail element; 6][bucket_bits: u32][count: u32]
//! [slot; bucket_elems]
//!
//! slot: [hash: u32][key_start: 4 bytes][data_pointer: u64][key_size: u32][data_size: u32]
//! ```
//!
//! A slot whose hash field is `0xFFFF_FFFF` is empty. Real hashes are 31 bits
//! wide, so the marker never collides with one.

use crate::avail::AvailTable;
use crate::{
    LayoutError, BUCKET_AVAIL, BUCKET_ELEMENT_BYTES, BUCKET_HEADER_BYTES, SMALL,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// On-disk hash value of an empty slot.
pub const EMPTY_SLOT: u32 = 0xFFFF_FFFF;

/// One occupied slot: where a record lives and enough of its key to reject
/// most mismatches without reading the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketElement {
    pub hash: u32,
    /// First bytes of the key, zero padded.
    pub key_start: [u8; SMALL],
    /// Offset of the record (key bytes followed by value bytes).
    pub data_pointer: u64,
    pub key_size: u32,
    pub data_size: u32,
}

impl BucketElement {
    #[must_use]
    pub fn new(hash: u32, key: &[u8], data_pointer: u64, data_size: u32) -> Self {
        let mut key_start = [0u8; SMALL];
        let n = key.len().min(SMALL);
        key_start[..n].copy_from_slice(&key[..n]);
        Self {
            hash,
            key_start,
            data_pointer,
            key_size: key.len() as u32,
            data_size,
        }
    }

    /// Cheap pre-check: hash, key length, and the stored key prefix agree.
    #[must_use]
    pub fn may_match(&self, hash: u32, key: &[u8]) -> bool {
        let n = key.len().min(SMALL);
        self.hash == hash
            && self.key_size as usize == key.len()
            && self.key_start[..n] == key[..n]
    }

    /// Bytes the record occupies in the file.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        u64::from(self.key_size) + u64::from(self.data_size)
    }

    fn write_to<W: Write>(slot: Option<&Self>, w: &mut W) -> std::io::Result<()> {
        match slot {
            Some(e) => {
                w.write_u32::<LittleEndian>(e.hash)?;
                w.write_all(&e.key_start)?;
                w.write_u64::<LittleEndian>(e.data_pointer)?;
                w.write_u32::<LittleEndian>(e.key_size)?;
                w.write_u32::<LittleEndian>(e.data_size)
            }
            None => {
                w.write_u32::<LittleEndian>(EMPTY_SLOT)?;
                w.write_all(&[0u8; BUCKET_ELEMENT_BYTES - 4])
            }
        }
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>, LayoutError> {
        let hash = r.read_u32::<LittleEndian>()?;
        let mut key_start = [0u8; SMALL];
        r.read_exact(&mut key_start)?;
        let data_pointer = r.read_u64::<LittleEndian>()?;
        let key_size = r.read_u32::<LittleEndian>()?;
        let data_size = r.read_u32::<LittleEndian>()?;
        match hash {
            EMPTY_SLOT => Ok(None),
            h if h > 0x7FFF_FFFF => Err(LayoutError::Corrupt(format!("slot hash {h:#x}"))),
            _ => Ok(Some(Self {
                hash,
                key_start,
                data_pointer,
                key_size,
                data_size,
            })),
        }
    }
}

/// Fixed-size open-addressing table with linear probing.
///
/// An element lives at its home slot (`hash % len`) or at the first free slot
/// after it, wrapping around. Removal re-seats the rest of the probe chain so
/// every element stays reachable from its home without tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<Option<BucketElement>>,
    occupied: usize,
}

impl SlotTable {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            occupied: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupied >= self.slots.len()
    }

    #[must_use]
    pub fn home(&self, hash: u32) -> usize {
        hash as usize % self.slots.len()
    }

    #[must_use]
    pub fn get(&self, loc: usize) -> Option<&BucketElement> {
        self.slots.get(loc).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, loc: usize) -> Option<&mut BucketElement> {
        self.slots.get_mut(loc).and_then(Option::as_mut)
    }

    /// Occupied slots visited when probing for `hash`, in probe order.
    ///
    /// Stops at the first empty slot or after one full lap.
    pub fn chain(&self, hash: u32) -> impl Iterator<Item = (usize, &BucketElement)> + '_ {
        let len = self.slots.len();
        let home = self.home(hash);
        (0..len)
            .map(move |step| (home + step) % len)
            .map_while(move |loc| self.slots[loc].as_ref().map(|e| (loc, e)))
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BucketElement)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(loc, slot)| slot.as_ref().map(|e| (loc, e)))
    }

    /// First occupied slot at or after `from`.
    #[must_use]
    pub fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&loc| self.slots[loc].is_some())
    }

    /// Places `elem` at the first free slot of its probe sequence.
    ///
    /// Returns `None` when the table is full.
    pub fn insert(&mut self, elem: BucketElement) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let len = self.slots.len();
        let home = self.home(elem.hash);
        let loc = (0..len)
            .map(|step| (home + step) % len)
            .find(|&loc| self.slots[loc].is_none())?;
        self.slots[loc] = Some(elem);
        self.occupied += 1;
        Some(loc)
    }

    /// Empties `loc` and pulls later members of the probe chain back so none
    /// of them is cut off from its home slot.
    pub fn remove(&mut self, loc: usize) -> Option<BucketElement> {
        let removed = self.slots.get_mut(loc)?.take()?;
        self.occupied -= 1;

        let len = self.slots.len();
        let mut gap = loc;
        let mut cur = (loc + 1) % len;
        while cur != gap {
            let Some(elem) = self.slots[cur] else { break };
            let home = self.home(elem.hash);
            let reachable_past_gap = if gap < cur {
                home <= gap || home > cur
            } else {
                home <= gap && home > cur
            };
            if reachable_past_gap {
                self.slots[gap] = self.slots[cur].take();
                gap = cur;
            }
            cur = (cur + 1) % len;
        }
        Some(removed)
    }
}

/// A decoded bucket page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBucket {
    /// Small free-range table local to this bucket.
    pub avail: AvailTable,
    /// Number of hash prefix bits shared by every key in the bucket.
    pub bits: u32,
    pub table: SlotTable,
}

impl HashBucket {
    #[must_use]
    pub fn new(elems: usize, bits: u32) -> Self {
        Self {
            avail: AvailTable::new(BUCKET_AVAIL),
            bits,
            table: SlotTable::new(elems),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.table.occupied()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.table.is_full()
    }

    /// Encodes the page padded to `bucket_size` bytes.
    #[must_use]
    pub fn encode(&self, bucket_size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(bucket_size as usize);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf.resize(bucket_size as usize, 0);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(self.avail.len() as u32)?;
        self.avail.write_entries(buf)?;
        buf.write_u32::<LittleEndian>(self.bits)?;
        buf.write_u32::<LittleEndian>(self.table.occupied() as u32)?;
        for loc in 0..self.table.len() {
            BucketElement::write_to(self.table.get(loc), buf)?;
        }
        Ok(())
    }

    /// Decodes a page holding `elems` slots.
    pub fn decode(buf: &[u8], elems: usize) -> Result<Self, LayoutError> {
        let needed = BUCKET_HEADER_BYTES + elems * BUCKET_ELEMENT_BYTES;
        if buf.len() < needed {
            return Err(LayoutError::Corrupt(format!(
                "bucket page is {} bytes, expected at least {needed}",
                buf.len()
            )));
        }

        let mut cursor = buf;
        let av_count = cursor.read_u32::<LittleEndian>()? as usize;
        let avail = AvailTable::read_entries(&mut cursor, BUCKET_AVAIL, av_count)?;
        let bits = cursor.read_u32::<LittleEndian>()?;
        let count = cursor.read_u32::<LittleEndian>()? as usize;
        if bits > 31 {
            return Err(LayoutError::Corrupt(format!("bucket bits {bits}")));
        }

        let mut slots = Vec::with_capacity(elems);
        for _ in 0..elems {
            slots.push(BucketElement::read_from(&mut cursor)?);
        }
        let occupied = slots.iter().filter(|s| s.is_some()).count();
        if occupied != count {
            return Err(LayoutError::Corrupt(format!(
                "bucket count {count} but {occupied} occupied slots"
            )));
        }

        Ok(Self {
            avail,
            bits,
            table: SlotTable { slots, occupied },
        })
    }
}
