//! Runtime tunables.
//!
//! Each setter updates the handle's [`Config`](crate::Config) copy so the
//! getters and a later `reorganize()` see the same values.

use crate::error::{DbError, Result};
use crate::lock::LockKind;
use crate::{Database, OpenMode};
use config::MIN_CACHE_SIZE;

/// Open mode plus the behaviour flags in effect on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub mode: OpenMode,
    pub sync: bool,
    /// Opened without an advisory lock.
    pub nolock: bool,
    /// Memory mapping disabled (by configuration or after a fallback).
    pub nommap: bool,
}

impl Database {
    /// Sets the number of cached buckets. Values below the minimum are
    /// raised to it.
    ///
    /// # Errors
    ///
    /// [`DbError::OptionAlreadySet`] once the cache has been populated, which
    /// happens on the first record access.
    pub fn set_cache_size(&mut self, size: usize) -> Result<()> {
        self.begin()?;
        let result = if self.cache.is_initialized() {
            Err(DbError::OptionAlreadySet)
        } else {
            let size = size.max(MIN_CACHE_SIZE);
            self.cache_capacity = size;
            self.config.cache_size = Some(size);
            Ok(())
        };
        self.track(result)
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache_capacity
    }

    /// Turns fsync-after-update on or off.
    pub fn set_sync_mode(&mut self, sync: bool) {
        self.config.sync = sync;
    }

    #[must_use]
    pub fn sync_mode(&self) -> bool {
        self.config.sync
    }

    /// Routes every freed range to the header table instead of the current
    /// bucket.
    pub fn set_central_free(&mut self, central: bool) {
        self.config.central_free = central;
    }

    #[must_use]
    pub fn central_free(&self) -> bool {
        self.config.central_free
    }

    /// Merges adjacent free ranges when they are released.
    pub fn set_coalesce_blocks(&mut self, coalesce: bool) {
        self.config.coalesce_blocks = coalesce;
    }

    #[must_use]
    pub fn coalesce_blocks(&self) -> bool {
        self.config.coalesce_blocks
    }

    /// Switches between mapped and direct I/O. Pending changes are written
    /// first.
    pub fn set_mmap(&mut self, enable: bool) -> Result<()> {
        self.begin()?;
        let result = self.switch_mapping(enable);
        self.track(result)
    }

    /// `true` while accesses go through a memory mapping.
    #[must_use]
    pub fn mmap_enabled(&self) -> bool {
        self.io.is_mapped()
    }

    /// Caps the size of the mapped window. The value is rounded up to the
    /// page size.
    ///
    /// # Errors
    ///
    /// [`DbError::OptionIllegal`] for zero.
    pub fn set_max_map_size(&mut self, size: u64) -> Result<()> {
        self.begin()?;
        let result = if size == 0 {
            Err(DbError::OptionIllegal)
        } else {
            self.config.max_map_size = size;
            self.io.set_max_map_size(size).map_err(DbError::from)
        };
        self.track(result)
    }

    #[must_use]
    pub fn max_map_size(&self) -> u64 {
        self.io.max_map_size()
    }

    #[must_use]
    pub fn flags(&self) -> OpenFlags {
        OpenFlags {
            mode: self.mode,
            sync: self.config.sync,
            nolock: self.lock == LockKind::None,
            nommap: !self.io.is_mapped(),
        }
    }

    fn switch_mapping(&mut self, enable: bool) -> Result<()> {
        if self.mode.is_writer() {
            let flushed = self.end_update();
            self.finish_mutation(flushed)?;
        }
        self.config.mmap = enable;
        if enable {
            if !self.io.is_mapped() {
                self.io.set_extent_hint(self.header.next_block);
                self.io.enable_mapping()?;
            }
        } else {
            self.io.disable_mapping()?;
        }
        Ok(())
    }
}
