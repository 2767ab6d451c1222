//! Bucket loading and splitting.
//!
//! ## Split
//!
//! ```text
//! before (dir_bits = 2, bucket bits = 1)      after (bits = 2)
//!
//!   dir[0] ─┐                                  dir[0] ─┐
//!   dir[1] ─┴─► B  (full)                      dir[1] ─┴─► B
//!   dir[2] ─┐                                  dir[2] ────► B0 (bit 1 of hash = 0)
//!   dir[3] ─┴─► C                              dir[3] ────► B1 (bit 1 of hash = 1)
//! ```
//!
//! When the bucket already uses every directory bit, the directory is doubled
//! first. The old bucket's space is handed to the avail table of whichever new
//! bucket is not current.

use crate::cache::CacheSlot;
use crate::error::{DbError, Result};
use crate::Database;
use layout::{AvailElem, HashBucket};

impl Database {
    /// Makes the bucket named by directory entry `dir_index` current,
    /// loading it into the cache if needed.
    pub(crate) fn get_bucket(&mut self, dir_index: usize) -> Result<()> {
        let adr = self.dir.get(dir_index).ok_or_else(|| {
            DbError::Corrupted(format!("directory index {dir_index} out of range"))
        })?;
        self.bucket_dir = dir_index;
        self.ensure_cache();

        if self.cache.current().adr == Some(adr) {
            return Ok(());
        }
        if let Some(index) = self.cache.position_of(adr) {
            self.cache.set_current(index);
            return Ok(());
        }

        let victim = self.cache.next_victim(None);
        let bucket_size = self.header.bucket_size;
        self.cache.slot_mut(victim).write_back(&mut self.io, bucket_size)?;
        self.cache.slot_mut(victim).invalidate();
        self.cache.set_current(victim);

        let bucket = self.read_bucket(adr)?;
        *self.cache.slot_mut(victim) = CacheSlot {
            adr: Some(adr),
            changed: false,
            bucket,
            data: None,
        };
        Ok(())
    }

    pub(crate) fn ensure_cache(&mut self) {
        if !self.cache.is_initialized() {
            self.cache
                .initialize(self.cache_capacity, self.header.bucket_elems as usize);
        }
    }

    /// Reads and decodes the bucket page at `adr` straight from the file.
    pub(crate) fn read_bucket(&mut self, adr: u64) -> Result<HashBucket> {
        let mut raw = vec![0u8; self.header.bucket_size as usize];
        self.io.read_at(adr, &mut raw)?;
        Ok(HashBucket::decode(&raw, self.header.bucket_elems as usize)?)
    }

    /// The bucket at `adr` as the cache or the file has it, without changing
    /// which bucket is current.
    pub(crate) fn peek_bucket(&mut self, adr: u64) -> Result<HashBucket> {
        match self.cache.position_of(adr) {
            Some(index) => Ok(self.cache.slot(index).bucket.clone()),
            None => self.read_bucket(adr),
        }
    }

    /// Splits the current bucket until the one that `next_insert` hashes to
    /// has a free slot.
    ///
    /// # Steps
    ///
    /// 1. Reserve two cache slots (never the current one), writing back
    ///    whatever they held.
    /// 2. Allocate two bucket pages; double the directory if the bucket
    ///    already uses every directory bit.
    /// 3. Distribute the slots on the next hash bit, give the second bucket a
    ///    fresh block of free space, and hand the old avail table to the
    ///    first.
    /// 4. Point the two halves of the old directory run at the new buckets.
    /// 5. Make current whichever new bucket `next_insert` maps to and free
    ///    the old bucket page into the other one.
    pub(crate) fn split_bucket(&mut self, next_insert: u32) -> Result<()> {
        let bucket_size = self.header.bucket_size;
        let block_size = self.header.block_size;
        let elems = self.header.bucket_elems as usize;
        let mut deferred_frees: Vec<AvailElem> = Vec::new();

        while self.cache.current().bucket.is_full() {
            let old_bits = self.cache.current().bucket.bits;
            if old_bits >= 31 {
                return Err(DbError::Corrupted("bucket cannot split further".into()));
            }
            let new_bits = old_bits + 1;

            let current = self.cache.current_index();
            let cache_0 = self.cache.next_victim(Some(current));
            self.cache.slot_mut(cache_0).write_back(&mut self.io, bucket_size)?;
            let cache_1 = self.cache.next_victim(Some(current));
            self.cache.slot_mut(cache_1).write_back(&mut self.io, bucket_size)?;

            let adr_0 = self.alloc(bucket_size)?;
            let adr_1 = self.alloc(bucket_size)?;

            if self.dir.bits() == old_bits {
                let old = AvailElem::new(self.header.dir, self.header.dir_size);
                self.grow_directory()?;
                deferred_frees.push(old);
            }

            let mut halves = [
                HashBucket::new(elems, new_bits),
                HashBucket::new(elems, new_bits),
            ];
            for (_, elem) in self.cache.current().bucket.table.iter() {
                let select = ((elem.hash >> (31 - new_bits)) & 1) as usize;
                if halves[select].table.insert(*elem).is_none() {
                    return Err(DbError::Corrupted("split target bucket overflowed".into()));
                }
            }

            let spare = self.alloc(block_size)?;
            halves[1].avail.insert(AvailElem::new(spare, block_size), false);

            halves[0].avail = self.cache.current().bucket.avail.clone();
            if halves[0].avail.is_full() {
                if let Some(first) = halves[0].avail.take_first() {
                    if !halves[1].avail.insert(first, false) {
                        deferred_frees.push(first);
                    }
                }
            }

            let shift = self.dir.bits() - new_bits;
            let start_1 = ((self.bucket_dir >> shift) | 1) << shift;
            let run = 1usize << shift;
            self.dir.set_range(start_1 - run..start_1, adr_0);
            self.dir.set_range(start_1..start_1 + run, adr_1);

            let old_adr = self.cache.current().adr;
            self.cache.current_mut().invalidate();
            let [bucket_0, bucket_1] = halves;
            *self.cache.slot_mut(cache_0) = CacheSlot {
                adr: Some(adr_0),
                changed: true,
                bucket: bucket_0,
                data: None,
            };
            *self.cache.slot_mut(cache_1) = CacheSlot {
                adr: Some(adr_1),
                changed: true,
                bucket: bucket_1,
                data: None,
            };

            self.dirty.bucket = true;
            self.dirty.second = true;
            self.dirty.directory = true;

            self.bucket_dir = self.dir.index_for(next_insert);
            let (target, other) = if self.dir.get(self.bucket_dir) == Some(adr_0) {
                (cache_0, cache_1)
            } else {
                (cache_1, cache_0)
            };
            self.cache.set_current(target);

            if let Some(adr) = old_adr {
                let old = AvailElem::new(adr, bucket_size);
                if !self.cache.slot_mut(other).bucket.avail.insert(old, false) {
                    deferred_frees.push(old);
                }
            }

            tracing::debug!(
                new_bits,
                dir_bits = self.dir.bits(),
                adr_0,
                adr_1,
                "split bucket"
            );
        }

        for elem in deferred_frees {
            self.free(elem.adr, elem.size)?;
        }
        Ok(())
    }

    /// Doubles the directory into freshly allocated space. The caller frees
    /// the old directory once the split is finished.
    fn grow_directory(&mut self) -> Result<()> {
        let grown = self.dir.doubled();
        let adr = self.alloc(grown.byte_size())?;

        self.header.dir = adr;
        self.header.dir_size = grown.byte_size();
        self.header.dir_bits = grown.bits();
        self.dir = grown;
        self.bucket_dir *= 2;
        self.dirty.header = true;
        self.dirty.directory = true;

        tracing::debug!(dir_bits = self.header.dir_bits, adr, "directory doubled");
        Ok(())
    }
}
