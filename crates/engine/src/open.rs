use crate::cache::BucketCache;
use crate::error::{DbError, Result};
use crate::lock::{self, LockKind};
use crate::{Database, Dirty, ErrorCode, OpenMode};
use config::Config;
use layout::{
    AvailElem, Directory, FileHeader, HashBucket, DEFAULT_CACHE_SIZE, HEADER_PREFIX_BYTES,
    MIN_BLOCK_SIZE,
};
use rawio::RawFile;
use std::fs::{File, OpenOptions};
use std::path::Path;

impl Database {
    /// Opens or creates the database at `path`.
    ///
    /// # Steps
    ///
    /// 1. Open the file according to `mode` (creating it for `WrCreat` and
    ///    `NewDb`). A reader on an empty file fails with `EmptyDatabase`.
    /// 2. Take the advisory lock: shared for readers, exclusive for writers.
    /// 3. For `NewDb`, truncate (only after the lock is held).
    /// 4. An empty file is initialised: header in block 0, directory in
    ///    block 1, the first bucket in block 2, block 3 recorded as free.
    ///    Otherwise the header and directory are read and validated.
    /// 5. Switch to memory-mapped I/O unless disabled.
    ///
    /// # Errors
    ///
    /// `FileOpen`, `EmptyDatabase`, `CantBeReader`/`CantBeWriter` on lock
    /// contention, `BlockSize`, `BadMagicNumber`, `ByteSwapped`,
    /// `BadFileOffset`, `Corrupted`, or an I/O error while reading the
    /// header.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, config: &Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = mode.is_writer();

        let mut options = OpenOptions::new();
        options.read(true);
        if writer {
            options.write(true);
        }
        if matches!(mode, OpenMode::WrCreat | OpenMode::NewDb) {
            options.create(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(config.permissions);
        }
        let file = options.open(&path).map_err(DbError::FileOpen)?;

        let mut file_size = file.metadata().map_err(DbError::FileStat)?.len();
        if mode == OpenMode::Reader && file_size == 0 {
            return Err(DbError::EmptyDatabase);
        }

        let lock = Self::acquire_lock(&file, mode, config)?;

        if mode == OpenMode::NewDb && file_size != 0 {
            if let Err(e) = file.set_len(0) {
                lock::unlock(&file, lock);
                return Err(DbError::FileWrite(e));
            }
            file_size = 0;
        }

        let mut io = RawFile::new(file, writer);
        let loaded = if file_size == 0 {
            Self::initialize(&mut io, config)
        } else {
            Self::load(&mut io, file_size)
        };
        let (header, dir) = match loaded {
            Ok(parts) => parts,
            Err(e) => {
                lock::unlock(io.file(), lock);
                return Err(e);
            }
        };

        io.set_extent_hint(header.next_block);
        if config.mmap {
            io.set_max_map_size(config.max_map_size)?;
            if let Err(e) = io.enable_mapping() {
                tracing::warn!(path = %path.display(), error = %e, "opening without memory mapping");
            }
        }

        tracing::info!(
            path = %path.display(),
            ?mode,
            block_size = header.block_size,
            dir_bits = header.dir_bits,
            "database opened"
        );

        Ok(Self {
            path,
            mode,
            io,
            lock,
            header,
            dir,
            cache: BucketCache::default(),
            cache_capacity: config.effective_cache_size(DEFAULT_CACHE_SIZE),
            bucket_dir: 0,
            dirty: Dirty::default(),
            config: config.clone(),
            last_error: ErrorCode::NoError,
            poisoned: false,
            closed: false,
            fatal_handler: None,
        })
    }

    fn acquire_lock(file: &File, mode: OpenMode, config: &Config) -> Result<LockKind> {
        if !config.locking {
            return Ok(LockKind::None);
        }
        match lock::try_lock(file, mode.is_writer()) {
            Ok(kind) => Ok(kind),
            Err(e) if mode.is_writer() => Err(DbError::CantBeWriter(e)),
            Err(e) if config.allow_unlocked_reader => {
                tracing::warn!(error = %e, "reader continuing without a lock");
                Ok(LockKind::None)
            }
            Err(e) => Err(DbError::CantBeReader(e)),
        }
    }

    /// Lays out a brand new database in an empty file and syncs it.
    fn initialize(io: &mut RawFile, config: &Config) -> Result<(FileHeader, Directory)> {
        let block_size = if config.block_size < MIN_BLOCK_SIZE {
            filesystem_block_size(io.file())
        } else {
            config.block_size
        };

        let header = FileHeader::new(block_size)?;
        let bs = u64::from(block_size);
        let first_bucket = 2 * bs;
        let dir = Directory::new(header.dir_bits, first_bucket);

        let mut bucket = HashBucket::new(header.bucket_elems as usize, 0);
        bucket.avail.insert(AvailElem::new(3 * bs, block_size), false);

        io.write_at(0, &header.encode())?;
        io.write_at(header.dir, &dir.encode())?;
        io.write_at(first_bucket, &bucket.encode(header.bucket_size))?;
        io.sync()?;

        tracing::info!(block_size, "initialized new database file");
        Ok((header, dir))
    }

    /// Reads and validates the header and directory of an existing file.
    ///
    /// Sizes taken from the header are checked against `file_size` before
    /// any buffer is sized from them.
    fn load(io: &mut RawFile, file_size: u64) -> Result<(FileHeader, Directory)> {
        let mut prefix = [0u8; HEADER_PREFIX_BYTES];
        io.read_at(0, &mut prefix)?;
        let block_size = FileHeader::peek_block_size(&prefix)?;
        if u64::from(block_size) > file_size {
            return Err(DbError::Corrupted(format!(
                "block size {block_size} exceeds file size {file_size}"
            )));
        }

        let mut block = vec![0u8; block_size as usize];
        io.read_at(0, &mut block)?;
        let header = FileHeader::decode(&block)?;
        let dir_end = header.dir.checked_add(u64::from(header.dir_size));
        if dir_end.map_or(true, |end| end > file_size) {
            return Err(DbError::Corrupted(format!(
                "directory at {} ({} bytes) lies past the end of the file",
                header.dir, header.dir_size
            )));
        }

        let mut raw_dir = vec![0u8; header.dir_size as usize];
        io.read_at(header.dir, &mut raw_dir)?;
        let dir = Directory::decode(&raw_dir, header.dir_bits)?;
        Ok((header, dir))
    }
}

#[cfg(unix)]
fn filesystem_block_size(file: &File) -> u32 {
    use std::os::unix::fs::MetadataExt;
    file.metadata()
        .map(|m| m.blksize() as u32)
        .unwrap_or(MIN_BLOCK_SIZE)
        .max(MIN_BLOCK_SIZE)
}

#[cfg(not(unix))]
fn filesystem_block_size(_file: &File) -> u32 {
    4096
}
