//! Free-space allocator.
//!
//! Free ranges are tracked in three tiers:
//!
//! | Tier                | Capacity          | Used for                          |
//! |---------------------|-------------------|-----------------------------------|
//! | current bucket      | 6                 | small frees, first-choice allocs  |
//! | header avail table  | fits in block 0   | large frees, fallback allocs      |
//! | overflow stack      | unbounded chain   | spill when the header table fills |
//!
//! Requests that nothing satisfies are carved from `next_block`, the end of
//! the allocated area, in whole blocks. Whatever is left over after an
//! allocation is freed again.

use crate::error::{DbError, Result};
use crate::Database;
use layout::{AvailBlock, AvailElem, BUCKET_AVAIL, IGNORE_SIZE};

impl Database {
    /// Reserves `size` bytes and returns their offset.
    pub(crate) fn alloc(&mut self, size: u32) -> Result<u64> {
        let from_bucket = self.cache.current_mut().bucket.avail.take_fit(size);
        let elem = match from_bucket {
            Some(elem) => {
                self.mark_current_changed();
                elem
            }
            None => {
                let table = &self.header.avail.table;
                if table.len() <= table.capacity() / 2 && self.header.avail.next != 0 {
                    self.pop_avail_block()?;
                }
                let elem = match self.header.avail.table.take_fit(size) {
                    Some(elem) => elem,
                    None => self.get_block(size)?,
                };
                self.dirty.header = true;
                elem
            }
        };

        self.free(elem.adr + u64::from(size), elem.size - size)?;
        Ok(elem.adr)
    }

    /// Returns `[adr, adr + size)` to the free pool.
    pub(crate) fn free(&mut self, adr: u64, size: u32) -> Result<()> {
        if size <= IGNORE_SIZE {
            return Ok(());
        }
        let elem = AvailElem::new(adr, size);
        let merge = self.config.coalesce_blocks;

        if size >= self.header.block_size || self.config.central_free {
            self.free_to_header(elem, merge)?;
        } else if self.cache.current().bucket.avail.len() < BUCKET_AVAIL {
            self.cache.current_mut().bucket.avail.insert(elem, merge);
            self.mark_current_changed();
        } else {
            self.free_to_header(elem, merge)?;
        }

        if self.dirty.header {
            self.adjust_bucket_avail();
        }
        Ok(())
    }

    fn free_to_header(&mut self, elem: AvailElem, merge: bool) -> Result<()> {
        if self.header.avail.table.is_full() {
            self.push_avail_block()?;
        }
        let stored = self.header.avail.table.insert(elem, merge);
        debug_assert!(stored, "header avail table full after spill");
        self.dirty.header = true;
        Ok(())
    }

    /// Extends the allocated area by enough whole blocks to hold `size`.
    fn get_block(&mut self, size: u32) -> Result<AvailElem> {
        let len = self.block_span(size)?;
        let elem = AvailElem::new(self.header.next_block, len);
        self.header.next_block += u64::from(len);
        self.io.set_extent_hint(self.header.next_block);
        self.dirty.header = true;
        Ok(elem)
    }

    /// Length of the whole-block run that growing the file by `size` bytes
    /// would reserve.
    pub(crate) fn block_span(&self, size: u32) -> Result<u32> {
        let bs = u64::from(self.header.block_size);
        let blocks = u64::from(size).div_ceil(bs).max(1);
        u32::try_from(blocks * bs).map_err(|_| DbError::IllegalData("record too large"))
    }

    /// Keeps the current bucket's table between a third and two thirds full
    /// by trading entries with the header table.
    fn adjust_bucket_avail(&mut self) {
        let third = BUCKET_AVAIL / 3;
        let merge = self.config.coalesce_blocks;
        let mut moved = false;

        let bucket = &mut self.cache.current_mut().bucket;
        if bucket.avail.len() < third {
            if let Some(elem) = self.header.avail.table.take_last() {
                bucket.avail.insert(elem, false);
                moved = true;
            }
        } else {
            while bucket.avail.len() > BUCKET_AVAIL - third && !self.header.avail.table.is_full() {
                match bucket.avail.take_first() {
                    Some(elem) => {
                        self.header.avail.table.insert(elem, merge);
                        moved = true;
                    }
                    None => break,
                }
            }
        }

        if moved {
            self.mark_current_changed();
        }
    }

    /// Moves half of the full header table into a new block on the overflow
    /// stack.
    pub(crate) fn push_avail_block(&mut self) -> Result<()> {
        let capacity = AvailBlock::spill_capacity(self.header.avail.table.capacity());
        let av_size = AvailBlock::encoded_len(capacity) as u32;

        let space = match self.header.avail.table.take_fit(av_size) {
            Some(elem) => elem,
            None => self.get_block(av_size)?,
        };

        let mut block = AvailBlock::new(capacity, self.header.avail.next);
        block.table.replace_entries(self.header.avail.table.split_odd());
        self.header.avail.next = space.adr;
        self.dirty.header = true;

        self.free(space.adr + u64::from(av_size), space.size - av_size)?;
        self.io.write_at(space.adr, &block.encode())?;

        tracing::debug!(
            adr = space.adr,
            moved = block.table.len(),
            "pushed avail block"
        );
        Ok(())
    }

    /// Pulls the top block of the overflow stack back into the header table
    /// and frees the block itself.
    pub(crate) fn pop_avail_block(&mut self) -> Result<()> {
        let adr = self.header.avail.next;
        let capacity = AvailBlock::spill_capacity(self.header.avail.table.capacity());
        let len = AvailBlock::encoded_len(capacity);
        let mut raw = vec![0u8; len];
        self.io.read_at(adr, &mut raw)?;
        let block = AvailBlock::decode(&raw, capacity)?;

        self.header.avail.next = block.next;
        self.dirty.header = true;

        for &elem in block.table.entries() {
            if self.header.avail.table.is_full() {
                self.push_avail_block()?;
            }
            self.header.avail.table.insert(elem, true);
        }

        if self.header.avail.table.is_full() {
            self.push_avail_block()?;
        }
        self.header.avail.table.insert(AvailElem::new(adr, len as u32), true);

        tracing::debug!(adr, restored = block.table.len(), "popped avail block");
        Ok(())
    }

    pub(crate) fn mark_current_changed(&mut self) {
        self.cache.current_mut().changed = true;
        self.dirty.bucket = true;
    }
}
