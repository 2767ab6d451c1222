//! Bucket cache.
//!
//! A fixed number of slots, each holding one decoded bucket page, the offset
//! it came from, a dirty flag, and the last record read through it. One slot
//! is "current": the bucket every record operation works on. Victims for new
//! loads are picked round-robin.

use crate::error::Result;
use layout::HashBucket;
use rawio::RawFile;

/// The most recently read record of a cached bucket.
#[derive(Debug, Clone)]
pub(crate) struct DataCache {
    pub hash: u32,
    pub elem_loc: usize,
    pub key_size: usize,
    /// Key bytes followed by value bytes.
    pub bytes: Vec<u8>,
}

impl DataCache {
    pub fn key(&self) -> &[u8] {
        &self.bytes[..self.key_size]
    }

    pub fn value(&self) -> &[u8] {
        &self.bytes[self.key_size..]
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CacheSlot {
    /// File offset of the cached bucket; `None` for an unused slot.
    pub adr: Option<u64>,
    pub changed: bool,
    pub bucket: HashBucket,
    pub data: Option<DataCache>,
}

impl CacheSlot {
    fn empty(elems: usize) -> Self {
        Self {
            adr: None,
            changed: false,
            bucket: HashBucket::new(elems, 0),
            data: None,
        }
    }

    /// Drops whatever the slot held without writing it back.
    pub fn invalidate(&mut self) {
        self.adr = None;
        self.changed = false;
        self.data = None;
    }

    /// Writes the bucket back if it is dirty.
    pub fn write_back(&mut self, io: &mut RawFile, bucket_size: u32) -> Result<()> {
        if !self.changed {
            return Ok(());
        }
        if let Some(adr) = self.adr {
            io.write_at(adr, &self.bucket.encode(bucket_size))?;
        }
        self.changed = false;
        self.data = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct BucketCache {
    slots: Vec<CacheSlot>,
    current: usize,
    last_read: usize,
}

impl BucketCache {
    /// `true` once slots have been allocated.
    pub fn is_initialized(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn initialize(&mut self, capacity: usize, elems: usize) {
        self.slots = (0..capacity).map(|_| CacheSlot::empty(elems)).collect();
        self.current = 0;
        self.last_read = 0;
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        self.current = index;
    }

    pub fn current(&self) -> &CacheSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut CacheSlot {
        &mut self.slots[self.current]
    }

    pub fn slot(&self, index: usize) -> &CacheSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut CacheSlot {
        &mut self.slots[index]
    }

    pub fn position_of(&self, adr: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.adr == Some(adr))
    }

    /// Advances the round-robin cursor, skipping `skip`, and returns the new
    /// victim index.
    pub fn next_victim(&mut self, skip: Option<usize>) -> usize {
        loop {
            self.last_read = (self.last_read + 1) % self.slots.len();
            if Some(self.last_read) != skip || self.slots.len() == 1 {
                return self.last_read;
            }
        }
    }

    /// Writes back the current slot, then every other dirty slot.
    pub fn write_back_all(&mut self, io: &mut RawFile, bucket_size: u32) -> Result<()> {
        if self.slots.is_empty() {
            return Ok(());
        }
        self.slots[self.current].write_back(io, bucket_size)?;
        for slot in &mut self.slots {
            slot.write_back(io, bucket_size)?;
        }
        Ok(())
    }
}
