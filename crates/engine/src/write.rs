/// Write path: `store()` and `delete()`.
///
/// Both locate the key through the read path, change the current bucket and
/// the allocator state in memory, write record bytes directly, and finish
/// with the ordered write-back in `update.rs`. An I/O failure after anything
/// became dirty poisons the handle.
use crate::error::{DbError, Result};
use crate::{Database, StoreMode};
use layout::BucketElement;

impl Database {
    /// Stores `value` under `key`.
    ///
    /// With [`StoreMode::Insert`] an existing key is left untouched and
    /// [`DbError::CannotReplace`] is returned. With [`StoreMode::Replace`]
    /// the old value is overwritten; a value of the same total size reuses
    /// the old space.
    ///
    /// # Errors
    ///
    /// `ReaderCantStore` on a read-only handle, `IllegalData` if the key and
    /// value together exceed 32-bit sizes, `CannotReplace`, or `Fatal` if the
    /// file could not be updated.
    pub fn store(&mut self, key: &[u8], value: &[u8], mode: StoreMode) -> Result<()> {
        self.begin()?;
        let result = if self.mode.is_writer() {
            let stored = self.store_record(key, value, mode);
            self.finish_mutation(stored)
        } else {
            Err(DbError::ReaderCantStore)
        };
        self.track(result)
    }

    /// Removes `key` and frees its record space.
    ///
    /// # Errors
    ///
    /// `ReaderCantDelete` on a read-only handle, `ItemNotFound` if the key is
    /// absent, or `Fatal` if the file could not be updated.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.begin()?;
        let result = if self.mode.is_writer() {
            let deleted = self.delete_record(key);
            self.finish_mutation(deleted)
        } else {
            Err(DbError::ReaderCantDelete)
        };
        self.track(result)
    }

    fn store_record(&mut self, key: &[u8], value: &[u8], mode: StoreMode) -> Result<()> {
        let (new_size, data_size) = self.checked_record_size(key.len(), value.len())?;

        let hash = layout::hash(key);
        match self.find_key(key)? {
            Some(loc) => {
                if mode == StoreMode::Insert {
                    return Err(DbError::CannotReplace);
                }
                let old = *self
                    .cache
                    .current()
                    .bucket
                    .table
                    .get(loc)
                    .ok_or_else(|| DbError::Corrupted(format!("slot {loc} is empty")))?;
                let old_size = record_size(&old)?;

                let file_adr = if old_size == new_size {
                    old.data_pointer
                } else {
                    self.free(old.data_pointer, old_size)?;
                    self.alloc(new_size)?
                };

                let slot = self.cache.current_mut();
                if let Some(elem) = slot.bucket.table.get_mut(loc) {
                    elem.data_pointer = file_adr;
                    elem.data_size = data_size;
                }
                slot.data = None;
                self.write_record(file_adr, key, value)?;
            }
            None => {
                let file_adr = self.alloc(new_size)?;
                if self.cache.current().bucket.is_full() {
                    self.split_bucket(hash)?;
                }

                let elem = BucketElement::new(hash, key, file_adr, data_size);
                self.cache
                    .current_mut()
                    .bucket
                    .table
                    .insert(elem)
                    .ok_or_else(|| DbError::Corrupted("no free slot after split".into()))?;
                self.write_record(file_adr, key, value)?;
            }
        }

        self.mark_current_changed();
        self.end_update()
    }

    fn delete_record(&mut self, key: &[u8]) -> Result<()> {
        let loc = self.find_key(key)?.ok_or(DbError::ItemNotFound)?;

        let slot = self.cache.current_mut();
        let removed = slot
            .bucket
            .table
            .remove(loc)
            .ok_or_else(|| DbError::Corrupted(format!("slot {loc} is empty")))?;
        // Removal may have moved other elements between slots.
        slot.data = None;
        self.mark_current_changed();

        self.free(removed.data_pointer, record_size(&removed)?)?;
        self.end_update()
    }

    /// Total record size and value size for a key and value of the given
    /// lengths, refused up front if the allocator could never place them.
    /// Nothing is freed or allocated before this check passes.
    pub(crate) fn checked_record_size(
        &self,
        key_len: usize,
        value_len: usize,
    ) -> Result<(u32, u32)> {
        let key_size = u32::try_from(key_len).map_err(|_| DbError::IllegalData("key too large"))?;
        let data_size =
            u32::try_from(value_len).map_err(|_| DbError::IllegalData("value too large"))?;
        let new_size = key_size
            .checked_add(data_size)
            .ok_or(DbError::IllegalData("record too large"))?;
        self.block_span(new_size)?;
        Ok((new_size, data_size))
    }

    fn write_record(&mut self, adr: u64, key: &[u8], value: &[u8]) -> Result<()> {
        self.io.write_at(adr, key)?;
        self.io.write_at(adr + key.len() as u64, value)?;
        Ok(())
    }
}

fn record_size(elem: &BucketElement) -> Result<u32> {
    u32::try_from(elem.record_len())
        .map_err(|_| DbError::Corrupted("record size exceeds 32 bits".into()))
}
