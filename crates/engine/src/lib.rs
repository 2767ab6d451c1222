//! # Engine - BucketKV storage engine
//!
//! A persistent key/value store kept in a single file and indexed by
//! extendible hashing. Keys and values are arbitrary byte strings.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────────┐
//! │                      DATABASE                        │
//! │                                                      │
//! │ read.rs  → hash key → directory → bucket (cache)     │
//! │            → probe slots → read record               │
//! │                                                      │
//! │ write.rs → find → alloc.rs (bucket / header avail)   │
//! │              |                                       │
//! │              |  (bucket full?)                       │
//! │              |       yes                             │
//! │              v                                       │
//! │           bucket.rs split (may double directory)     │
//! │              |                                       │
//! │              v                                       │
//! │           update.rs write-back: buckets → directory  │
//! │                                 → header             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                                   |
//! |---------------|-----------------------------------------------------------|
//! | [`lib.rs`]    | `Database` struct, modes, accessors, `close`, `Debug`, `Drop` |
//! | [`open`]      | Create or validate the file, lock it, load header/directory |
//! | [`lock`]      | flock → lockf → fcntl advisory locking                    |
//! | [`cache`]     | Bucket cache slots and the per-bucket record cache        |
//! | [`bucket`]    | Bucket loading and splitting, directory doubling          |
//! | [`alloc`]     | Free-space allocator and overflow avail stack             |
//! | [`read`]      | `fetch()`, `exists()`, iteration, `count()`                |
//! | [`write`]     | `store()`, `delete()`                                      |
//! | [`update`]    | Ordered write-back, `sync()`, fatal error handling        |
//! | [`reorg`]     | `reorganize()` into a compact copy                        |
//! | [`options`]   | Runtime tunables                                          |
//! | [`verify`]    | Structural consistency check                              |
//!
//! ## Crash Safety
//!
//! Each mutating call ends by writing dirty buckets, then the directory, then
//! the header. With sync mode on, the header write is followed by an fsync.
//! There is no journal: a crash in the middle of a write-back can leave the
//! file inconsistent, and a failed write-back poisons the handle.
mod alloc;
mod bucket;
mod cache;
mod error;
mod lock;
mod open;
mod options;
mod read;
mod reorg;
mod update;
mod verify;
mod write;

pub use config::Config;
pub use error::{DbError, ErrorCode, Result};
pub use options::OpenFlags;
pub use read::Keys;
pub use verify::Consistency;

use cache::BucketCache;
use layout::{Directory, FileHeader};
use lock::LockKind;
use rawio::RawFile;
use std::path::{Path, PathBuf};

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only, shared lock. The file must exist and be non-empty.
    Reader,
    /// Read-write, exclusive lock. The file must exist.
    Writer,
    /// Read-write, creating the file if needed.
    WrCreat,
    /// Read-write, truncating any existing contents.
    NewDb,
}

impl OpenMode {
    #[must_use]
    pub fn is_writer(self) -> bool {
        !matches!(self, OpenMode::Reader)
    }
}

/// What `store` does when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Fail with [`DbError::CannotReplace`].
    Insert,
    /// Overwrite the existing value.
    Replace,
}

/// Pending write-back work for the current operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dirty {
    /// The current bucket changed.
    pub bucket: bool,
    /// Cached buckets other than the current one changed.
    pub second: bool,
    pub directory: bool,
    pub header: bool,
}

impl Dirty {
    pub fn any(&self) -> bool {
        self.bucket || self.second || self.directory || self.header
    }
}

type FatalHandler = Box<dyn FnMut(&str) + Send>;

/// An open database file.
///
/// All state that the file format keeps in memory lives here: the header,
/// the directory, the bucket cache, and the dirty flags that drive
/// write-back. Dropping the handle closes it.
pub struct Database {
    pub(crate) path: PathBuf,
    pub(crate) mode: OpenMode,
    pub(crate) io: RawFile,
    pub(crate) lock: LockKind,
    pub(crate) header: FileHeader,
    pub(crate) dir: Directory,
    pub(crate) cache: BucketCache,
    pub(crate) cache_capacity: usize,
    /// Directory index of the current bucket.
    pub(crate) bucket_dir: usize,
    pub(crate) dirty: Dirty,
    /// Runtime settings; updated by the option setters.
    pub(crate) config: Config,
    pub(crate) last_error: ErrorCode,
    pub(crate) poisoned: bool,
    pub(crate) closed: bool,
    pub(crate) fatal_handler: Option<FatalHandler>,
}

impl Database {
    /// Path the database was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    /// Code of the most recent failed call on this handle, or
    /// [`ErrorCode::NoError`] if the last call succeeded.
    #[must_use]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// `true` after a fatal error; every further call fails.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Installs a callback invoked with a description of any fatal error
    /// before that error is returned.
    pub fn set_fatal_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.fatal_handler = Some(Box::new(handler));
    }

    /// Flushes pending changes, releases the lock and closes the file.
    ///
    /// # Errors
    ///
    /// `Fatal` if the flush fails part way; the fatal handler runs first.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut result = Ok(());
        if self.mode.is_writer() && !self.poisoned {
            let flushed = self.end_update().and_then(|()| Ok(self.io.sync()?));
            result = self.finish_mutation(flushed);
        }
        self.io.unmap();
        lock::unlock(self.io.file(), self.lock);
        tracing::info!(path = %self.path.display(), "database closed");
        result
    }

    /// Starts a public call: rejects poisoned handles and clears the
    /// last-error code.
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.poisoned {
            self.last_error = ErrorCode::Poisoned;
            return Err(DbError::Poisoned);
        }
        self.last_error = ErrorCode::NoError;
        Ok(())
    }

    /// Records the outcome of a public call.
    pub(crate) fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = e.code();
        }
        result
    }
}

#[cfg(unix)]
impl std::os::unix::io::AsRawFd for Database {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        std::os::unix::io::AsRawFd::as_raw_fd(self.io.file())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("block_size", &self.header.block_size)
            .field("dir_bits", &self.header.dir_bits)
            .field("next_block", &self.header.next_block)
            .field("cache_capacity", &self.cache_capacity)
            .field("lock", &self.lock)
            .field("mapped", &self.io.is_mapped())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

/// Best-effort close: pending changes are written and synced, errors are
/// dropped because `Drop` cannot report them. Call [`Database::close`] to
/// observe failures.
impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests;
