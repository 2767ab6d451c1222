//! Write-back coordinator.
//!
//! Changes made by one operation are written in a fixed order: cached
//! buckets (current first), then the directory, then the header block. The
//! dirty flags for a stage are cleared only once that stage and its fsync
//! have succeeded, so a failure leaves them set and the handle poisoned.

use crate::error::{DbError, Result};
use crate::Database;

impl Database {
    pub(crate) fn end_update(&mut self) -> Result<()> {
        if self.dirty.bucket || self.dirty.second {
            let bucket_size = self.header.bucket_size;
            self.cache.write_back_all(&mut self.io, bucket_size)?;
            self.dirty.bucket = false;
            self.dirty.second = false;
        }

        if self.dirty.directory {
            self.io.write_at(self.header.dir, &self.dir.encode())?;
            if !self.dirty.header && self.config.sync {
                self.io.sync()?;
            }
            self.dirty.directory = false;
        }

        if self.dirty.header {
            self.io.write_at(0, &self.header.encode())?;
            if self.config.sync {
                self.io.sync()?;
            }
            self.dirty.header = false;
        }
        Ok(())
    }

    /// Writes all pending changes and flushes them to stable storage.
    ///
    /// A no-op for readers.
    pub fn sync(&mut self) -> Result<()> {
        self.begin()?;
        let result = if self.mode.is_writer() {
            let flushed = self.end_update().and_then(|()| Ok(self.io.sync()?));
            self.finish_mutation(flushed)
        } else {
            Ok(())
        };
        self.track(result)
    }

    /// Turns an I/O failure that happened while structures were half written
    /// into a fatal error.
    pub(crate) fn finish_mutation<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if e.is_io() && self.dirty.any() => Err(self.fatal(e)),
            other => other,
        }
    }

    fn fatal(&mut self, err: DbError) -> DbError {
        let message = err.to_string();
        tracing::warn!(path = %self.path.display(), error = %message, "fatal error, handle poisoned");
        if let Some(handler) = self.fatal_handler.as_mut() {
            handler(&message);
        }
        self.poisoned = true;
        DbError::Fatal(Box::new(err))
    }
}
