//! # RawIO - positioned file access for BucketKV
//!
//! [`RawFile`] is the only way the engine touches its database file. It offers
//! plain `Read`/`Write`/`Seek` plus the two helpers the engine relies on,
//! [`RawFile::full_read`] and [`RawFile::full_write`], which either move the
//! whole buffer or fail.
//!
//! ## Backends
//!
//! ```text
//!            RawFile
//!               |
//!     mapping enabled?
//!       /            \
//!     yes             no
//!      |               |
//!  mapped window    read(2)/write(2)
//!  [off, off+size)  at the file cursor
//!      |
//!  remap failed ──► permanent fallback to direct I/O
//! ```
//!
//! The mapped backend keeps a window of at most `max_map_size` bytes. Accesses
//! outside the window move it. Writers grow the file on demand by writing a
//! single zero byte at the new end, never to less than the extent hint (the
//! engine's next unallocated offset). If a remap fails, mapping is switched
//! off for the lifetime of the handle and the access is retried directly.

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Errors from whole-buffer transfers and housekeeping calls.
#[derive(Debug, Error)]
pub enum RawIoError {
    /// The file ended before the buffer was filled.
    #[error("unexpected end of file")]
    Eof,

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("write error: {0}")]
    Write(#[source] io::Error),

    #[error("seek error: {0}")]
    Seek(#[source] io::Error),

    #[error("sync error: {0}")]
    Sync(#[source] io::Error),

    #[error("stat error: {0}")]
    Stat(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Remap {
    /// Map what exists; never grow the file.
    Default,
    /// Grow the file if the request reaches past its end.
    Extend,
}

enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Region {
    fn bytes(&self) -> &[u8] {
        match self {
            Region::ReadOnly(m) => m,
            Region::ReadWrite(m) => m,
        }
    }
}

/// A database file opened either for reading or for reading and writing.
pub struct RawFile {
    file: File,
    writable: bool,
    /// `true` while the mapped backend is in use.
    mapping: bool,
    region: Option<Region>,
    /// File offset of the first mapped byte (page aligned once mapped).
    mapped_off: u64,
    /// Current position relative to `mapped_off`.
    mapped_pos: u64,
    /// Length of the mapped window.
    mapped_size: u64,
    max_map_size: u64,
    extent_hint: u64,
}

/// Size of a virtual memory page.
#[must_use]
pub fn page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 {
            return n as u64;
        }
    }
    4096
}

/// Rounds `size` up to a whole number of pages, saturating at `u64::MAX`.
#[must_use]
pub fn round_to_page(size: u64) -> u64 {
    let page = page_size();
    match size.checked_add(page - 1) {
        Some(n) => n / page * page,
        None => u64::MAX,
    }
}

impl RawFile {
    /// Wraps `file`, starting on the direct backend.
    #[must_use]
    pub fn new(file: File, writable: bool) -> Self {
        Self {
            file,
            writable,
            mapping: false,
            region: None,
            mapped_off: 0,
            mapped_pos: 0,
            mapped_size: 0,
            max_map_size: u64::MAX,
            extent_hint: 0,
        }
    }

    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// `true` while accesses go through the mapped window.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapping
    }

    #[must_use]
    pub fn max_map_size(&self) -> u64 {
        self.max_map_size
    }

    /// Smallest size the file is grown to when a mapped write reaches past
    /// its end.
    pub fn set_extent_hint(&mut self, next_block: u64) {
        self.extent_hint = next_block;
    }

    /// Current size of the file on disk.
    pub fn file_size(&self) -> Result<u64, RawIoError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(RawIoError::Stat)
    }

    /// Switches to the mapped backend and maps as much of the file as the
    /// window allows, starting at the current position.
    ///
    /// On failure mapping stays off and the error is returned; the handle
    /// remains fully usable on the direct backend.
    pub fn enable_mapping(&mut self) -> Result<(), RawIoError> {
        let pos = self.position()?;
        self.unmap();
        self.mapped_off = pos;
        self.mapping = true;
        let file_size = self.file_size()?;
        if let Err(e) = self.remap(file_size, Remap::Default) {
            self.fall_back(pos);
            return Err(RawIoError::Read(e));
        }
        Ok(())
    }

    /// Flushes and drops the mapping, continuing on the direct backend.
    pub fn disable_mapping(&mut self) -> Result<(), RawIoError> {
        if !self.mapping {
            return Ok(());
        }
        let pos = self.mapped_off + self.mapped_pos;
        self.flush_region()?;
        self.leave_mapping();
        self.file.seek(SeekFrom::Start(pos)).map_err(RawIoError::Seek)?;
        Ok(())
    }

    /// Sets the largest window the mapped backend may use, rounded up to the
    /// page size, and rebuilds the window if mapping is on.
    pub fn set_max_map_size(&mut self, size: u64) -> Result<(), RawIoError> {
        self.max_map_size = round_to_page(size.max(1));
        if self.mapping {
            self.flush_region()?;
            self.enable_mapping()?;
        }
        Ok(())
    }

    /// Drops the current window without leaving the mapped backend; the next
    /// access maps again. Callers must seek before the next transfer.
    pub fn unmap(&mut self) {
        self.region = None;
        self.mapped_size = 0;
        self.mapped_pos = 0;
        self.mapped_off = 0;
    }

    /// Reads exactly `buf.len()` bytes from the current position.
    ///
    /// Interrupted reads are retried. A short read reports [`RawIoError::Eof`].
    pub fn full_read(&mut self, mut buf: &mut [u8]) -> Result<(), RawIoError> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => return Err(RawIoError::Eof),
                Ok(n) => {
                    let rest = buf;
                    buf = &mut rest[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RawIoError::Read(e)),
            }
        }
        Ok(())
    }

    /// Writes all of `buf` at the current position.
    ///
    /// Interrupted writes are retried. A write that makes no progress is
    /// reported as out of space.
    pub fn full_write(&mut self, mut buf: &[u8]) -> Result<(), RawIoError> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(RawIoError::Write(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "no space left on device",
                    )))
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RawIoError::Write(e)),
            }
        }
        Ok(())
    }

    /// Seeks to `offset` and fills `buf`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), RawIoError> {
        self.seek(SeekFrom::Start(offset)).map_err(RawIoError::Seek)?;
        self.full_read(buf)
    }

    /// Seeks to `offset` and writes all of `buf`.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), RawIoError> {
        self.seek(SeekFrom::Start(offset)).map_err(RawIoError::Seek)?;
        self.full_write(buf)
    }

    /// Makes every completed write durable.
    pub fn sync(&mut self) -> Result<(), RawIoError> {
        self.flush_region()?;
        self.file.sync_all().map_err(RawIoError::Sync)
    }

    fn flush_region(&self) -> Result<(), RawIoError> {
        if let Some(Region::ReadWrite(m)) = &self.region {
            m.flush().map_err(RawIoError::Sync)?;
        }
        Ok(())
    }

    fn position(&mut self) -> Result<u64, RawIoError> {
        if self.mapping {
            Ok(self.mapped_off + self.mapped_pos)
        } else {
            self.file.stream_position().map_err(RawIoError::Seek)
        }
    }

    /// Leaves the mapped backend for good after a failed remap.
    fn fall_back(&mut self, pos: u64) {
        if self.mapping {
            tracing::warn!(pos, "memory mapping failed, continuing with direct I/O");
        }
        self.leave_mapping();
    }

    fn leave_mapping(&mut self) {
        self.region = None;
        self.mapping = false;
        self.mapped_size = 0;
        self.mapped_pos = 0;
        self.mapped_off = 0;
    }

    /// Moves or resizes the window so that it reaches `size` bytes into the
    /// file where possible.
    fn remap(&mut self, mut size: u64, flag: Remap) -> io::Result<()> {
        let mut file_size = match self.file.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                self.unmap();
                return Err(e);
            }
        };

        if self.writable {
            if size > file_size {
                if flag == Remap::Default {
                    return Ok(());
                }
                size = size.max(self.extent_hint);
                (&self.file).seek(SeekFrom::Start(size - 1))?;
                (&self.file).write_all(&[0])?;
                file_size = size;
            }
        } else {
            size = size.min(file_size);
            if self.region.is_some() && size == self.mapped_off + self.mapped_size {
                return Ok(());
            }
        }

        let pos = self.mapped_off + self.mapped_pos;
        if size > self.max_map_size {
            self.mapped_off = pos;
            self.mapped_pos = 0;
            size = self.max_map_size.min(file_size.saturating_sub(pos));
        } else {
            self.mapped_pos = pos;
            self.mapped_off = 0;
        }
        self.map_window(size)
    }

    fn map_window(&mut self, size: u64) -> io::Result<()> {
        self.region = None;
        self.mapped_size = size;
        if size == 0 {
            return Ok(());
        }

        // The window start must be page aligned; widen it backwards so it
        // still reaches the same end.
        let delta = self.mapped_off % page_size();
        self.mapped_pos += delta;
        self.mapped_off -= delta;
        self.mapped_size = size + delta;
        let len = usize::try_from(self.mapped_size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "window exceeds address space"))?;

        let mut options = MmapOptions::new();
        options.offset(self.mapped_off).len(len);
        // SAFETY: the window lies inside the file (size was clamped to the
        // file length above) and the file is locked against other writers.
        let region = unsafe {
            if self.writable {
                Region::ReadWrite(options.map_mut(&self.file)?)
            } else {
                Region::ReadOnly(options.map(&self.file)?)
            }
        };
        self.region = Some(region);
        Ok(())
    }

    fn window_exhausted(&self) -> bool {
        self.region.is_none() || self.mapped_pos >= self.mapped_size
    }
}

impl Read for RawFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.mapping {
            return self.file.read(buf);
        }

        let mut total = 0;
        while total < buf.len() {
            let want = (buf.len() - total) as u64;
            if self.window_exhausted() {
                let pos = self.mapped_off + self.mapped_pos;
                if self
                    .remap(self.mapped_off + self.mapped_size + want, Remap::Default)
                    .is_err()
                {
                    self.fall_back(pos);
                    self.file.seek(SeekFrom::Start(pos))?;
                    return match self.file.read(&mut buf[total..]) {
                        Ok(n) => Ok(total + n),
                        Err(_) if total > 0 => Ok(total),
                        Err(e) => Err(e),
                    };
                }
            }

            let available = self.mapped_size.saturating_sub(self.mapped_pos);
            if available == 0 || self.region.is_none() {
                break;
            }
            let n = available.min(want) as usize;
            let start = self.mapped_pos as usize;
            if let Some(region) = &self.region {
                buf[total..total + n].copy_from_slice(&region.bytes()[start..start + n]);
            }
            self.mapped_pos += n as u64;
            total += n;
        }
        Ok(total)
    }
}

impl Write for RawFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is open read-only",
            ));
        }
        if !self.mapping {
            return self.file.write(buf);
        }

        let mut total = 0;
        while total < buf.len() {
            let want = (buf.len() - total) as u64;
            if self.window_exhausted() {
                let pos = self.mapped_off + self.mapped_pos;
                if self
                    .remap(self.mapped_off + self.mapped_size + want, Remap::Extend)
                    .is_err()
                {
                    self.fall_back(pos);
                    self.file.seek(SeekFrom::Start(pos))?;
                    return match self.file.write(&buf[total..]) {
                        Ok(n) => Ok(total + n),
                        Err(_) if total > 0 => Ok(total),
                        Err(e) => Err(e),
                    };
                }
            }

            let available = self.mapped_size.saturating_sub(self.mapped_pos);
            if available == 0 {
                break;
            }
            let n = available.min(want) as usize;
            let start = self.mapped_pos as usize;
            match &mut self.region {
                Some(Region::ReadWrite(m)) => m[start..start + n].copy_from_slice(&buf[total..total + n]),
                _ => break,
            }
            self.mapped_pos += n as u64;
            total += n;
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for RawFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if !self.mapping {
            return self.file.seek(pos);
        }

        let current = self.mapped_off + self.mapped_pos;
        let needle = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => current.checked_add_signed(d),
            SeekFrom::End(d) => self.file.metadata()?.len().checked_add_signed(d),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file"))?;

        if needle < self.mapped_off || needle > self.mapped_off + self.mapped_size {
            self.unmap();
            self.mapped_off = needle;
        } else {
            self.mapped_pos = needle - self.mapped_off;
        }
        Ok(needle)
    }
}

impl std::fmt::Debug for RawFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFile")
            .field("writable", &self.writable)
            .field("mapping", &self.mapping)
            .field("mapped_off", &self.mapped_off)
            .field("mapped_pos", &self.mapped_pos)
            .field("mapped_size", &self.mapped_size)
            .field("max_map_size", &self.max_map_size)
            .finish()
    }
}

#[cfg(test)]
mod tests;
