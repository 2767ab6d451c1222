//! `reorganize()`: rebuild the file without its free space.
//!
//! Every record is copied into a fresh database named `#<name>#` in the same
//! directory, which is then renamed over the original. The handle adopts the
//! new file's descriptor, lock, header, directory and cache in place, so
//! callers keep using the same `Database`.

use crate::error::{DbError, Result};
use crate::lock::{self, LockKind};
use crate::{Database, Dirty, OpenMode, StoreMode};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

impl Database {
    /// Rewrites the database compactly.
    ///
    /// # Errors
    ///
    /// `ReaderCantReorganize` on a read-only handle. Any failure while
    /// building or installing the copy is reported as `ReorganizeFailed`;
    /// the temporary file is removed and the original is left as it was.
    pub fn reorganize(&mut self) -> Result<()> {
        self.begin()?;
        let result = if self.mode.is_writer() {
            let rebuilt = self.rebuild();
            self.finish_mutation(rebuilt)
        } else {
            Err(DbError::ReaderCantReorganize)
        };
        self.track(result)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.end_update()?;
        let before = self.header.next_block;

        let temp = temp_path_for(&self.path).map_err(|e| failed(DbError::FileOpen(e)))?;
        let fresh = match self.copy_into(&temp) {
            Ok(fresh) => fresh,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(failed(e));
            }
        };

        self.io.unmap();
        if let Err(e) = fs::rename(&temp, &self.path) {
            drop(fresh);
            let _ = fs::remove_file(&temp);
            return Err(failed(DbError::FileWrite(e)));
        }
        self.adopt(fresh)?;

        tracing::info!(
            path = %self.path.display(),
            before,
            after = self.header.next_block,
            "database reorganized"
        );
        Ok(())
    }

    /// Creates the temporary database and inserts every record into it.
    fn copy_into(&mut self, temp: &Path) -> Result<Database> {
        let mut config = self.config.clone();
        config.block_size = self.header.block_size;
        config.cache_size = Some(self.cache_capacity);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = self.io.file().metadata().map_err(DbError::FileStat)?;
            config.permissions = meta.permissions().mode() & 0o7777;
        }

        let mut fresh = Database::open(temp, OpenMode::NewDb, &config)?;
        let mut next = self.scan_from(0, 0)?;
        while let Some(key) = next {
            let value = self.fetch_value(&key)?;
            fresh.store(&key, &value, StoreMode::Insert)?;
            next = self.key_after(&key)?;
        }
        fresh.sync()?;
        Ok(fresh)
    }

    /// Takes over the renamed copy's file state.
    fn adopt(&mut self, mut fresh: Database) -> Result<()> {
        lock::unlock(self.io.file(), self.lock);

        std::mem::swap(&mut self.io, &mut fresh.io);
        std::mem::swap(&mut self.header, &mut fresh.header);
        std::mem::swap(&mut self.dir, &mut fresh.dir);
        std::mem::swap(&mut self.cache, &mut fresh.cache);
        self.lock = std::mem::replace(&mut fresh.lock, LockKind::None);
        self.cache_capacity = fresh.cache_capacity;
        self.bucket_dir = 0;
        self.dirty = Dirty::default();

        // `fresh` now owns the old descriptor; closing it must not write.
        fresh.closed = true;
        drop(fresh);

        self.io.sync()?;
        self.get_bucket(0)
    }
}

fn failed(e: DbError) -> DbError {
    DbError::ReorganizeFailed(Box::new(e))
}

/// `dir/name` becomes `dir/#name#`.
fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "database path has no file name")
    })?;
    let mut temp_name = std::ffi::OsString::from("#");
    temp_name.push(name);
    temp_name.push("#");
    Ok(path.with_file_name(temp_name))
}
