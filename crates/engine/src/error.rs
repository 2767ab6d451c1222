//! Error taxonomy.
//!
//! Every public operation returns [`Result`]. The handle also remembers the
//! [`ErrorCode`] of its most recent failure for callers that prefer to poll
//! ([`crate::Database::last_error`]).

use layout::LayoutError;
use rawio::RawIoError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("block size error")]
    BlockSize,

    #[error("file open error: {0}")]
    FileOpen(#[source] io::Error),

    #[error("file write error: {0}")]
    FileWrite(#[source] io::Error),

    #[error("file seek error: {0}")]
    FileSeek(#[source] io::Error),

    #[error("file read error: {0}")]
    FileRead(#[source] io::Error),

    #[error("file stat error: {0}")]
    FileStat(#[source] io::Error),

    #[error("unexpected end of file")]
    FileEof,

    #[error("bad magic number {0:#010x}")]
    BadMagicNumber(u32),

    #[error("file was written with the opposite byte order")]
    ByteSwapped,

    #[error("file uses an unsupported offset width")]
    BadFileOffset,

    #[error("database file is empty")]
    EmptyDatabase,

    #[error("can't be reader: {0}")]
    CantBeReader(#[source] io::Error),

    #[error("can't be writer: {0}")]
    CantBeWriter(#[source] io::Error),

    #[error("reader can't delete")]
    ReaderCantDelete,

    #[error("reader can't store")]
    ReaderCantStore,

    #[error("reader can't reorganize")]
    ReaderCantReorganize,

    #[error("item not found")]
    ItemNotFound,

    #[error("reorganization failed: {0}")]
    ReorganizeFailed(#[source] Box<DbError>),

    #[error("cannot replace existing item")]
    CannotReplace,

    #[error("illegal data: {0}")]
    IllegalData(&'static str),

    #[error("option already set")]
    OptionAlreadySet,

    #[error("illegal option value")]
    OptionIllegal,

    #[error("database structure corrupted: {0}")]
    Corrupted(String),

    /// A write-back failed part way; the file may be inconsistent.
    #[error("fatal error: {0}")]
    Fatal(#[source] Box<DbError>),

    /// An earlier fatal error left this handle unusable.
    #[error("handle is unusable after a fatal error")]
    Poisoned,
}

/// Copyable summary of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    NoError,
    BlockSize,
    FileOpen,
    FileWrite,
    FileSeek,
    FileRead,
    FileStat,
    FileEof,
    BadMagicNumber,
    ByteSwapped,
    BadFileOffset,
    EmptyDatabase,
    CantBeReader,
    CantBeWriter,
    ReaderCantDelete,
    ReaderCantStore,
    ReaderCantReorganize,
    ItemNotFound,
    ReorganizeFailed,
    CannotReplace,
    IllegalData,
    OptionAlreadySet,
    OptionIllegal,
    Corrupted,
    Fatal,
    Poisoned,
}

impl DbError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            DbError::BlockSize => ErrorCode::BlockSize,
            DbError::FileOpen(_) => ErrorCode::FileOpen,
            DbError::FileWrite(_) => ErrorCode::FileWrite,
            DbError::FileSeek(_) => ErrorCode::FileSeek,
            DbError::FileRead(_) => ErrorCode::FileRead,
            DbError::FileStat(_) => ErrorCode::FileStat,
            DbError::FileEof => ErrorCode::FileEof,
            DbError::BadMagicNumber(_) => ErrorCode::BadMagicNumber,
            DbError::ByteSwapped => ErrorCode::ByteSwapped,
            DbError::BadFileOffset => ErrorCode::BadFileOffset,
            DbError::EmptyDatabase => ErrorCode::EmptyDatabase,
            DbError::CantBeReader(_) => ErrorCode::CantBeReader,
            DbError::CantBeWriter(_) => ErrorCode::CantBeWriter,
            DbError::ReaderCantDelete => ErrorCode::ReaderCantDelete,
            DbError::ReaderCantStore => ErrorCode::ReaderCantStore,
            DbError::ReaderCantReorganize => ErrorCode::ReaderCantReorganize,
            DbError::ItemNotFound => ErrorCode::ItemNotFound,
            DbError::ReorganizeFailed(_) => ErrorCode::ReorganizeFailed,
            DbError::CannotReplace => ErrorCode::CannotReplace,
            DbError::IllegalData(_) => ErrorCode::IllegalData,
            DbError::OptionAlreadySet => ErrorCode::OptionAlreadySet,
            DbError::OptionIllegal => ErrorCode::OptionIllegal,
            DbError::Corrupted(_) => ErrorCode::Corrupted,
            DbError::Fatal(_) => ErrorCode::Fatal,
            DbError::Poisoned => ErrorCode::Poisoned,
        }
    }

    /// `true` for failures of the underlying file.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            DbError::FileWrite(_)
                | DbError::FileSeek(_)
                | DbError::FileRead(_)
                | DbError::FileStat(_)
                | DbError::FileEof
        )
    }
}

impl From<RawIoError> for DbError {
    fn from(e: RawIoError) -> Self {
        match e {
            RawIoError::Eof => DbError::FileEof,
            RawIoError::Read(e) => DbError::FileRead(e),
            RawIoError::Write(e) | RawIoError::Sync(e) => DbError::FileWrite(e),
            RawIoError::Seek(e) => DbError::FileSeek(e),
            RawIoError::Stat(e) => DbError::FileStat(e),
        }
    }
}

impl From<LayoutError> for DbError {
    fn from(e: LayoutError) -> Self {
        match e {
            LayoutError::BadMagic(m) => DbError::BadMagicNumber(m),
            LayoutError::ByteSwapped => DbError::ByteSwapped,
            LayoutError::BadFileOffset => DbError::BadFileOffset,
            LayoutError::BlockSize(_) => DbError::BlockSize,
            LayoutError::Corrupt(what) => DbError::Corrupted(what),
            LayoutError::Io(e) => DbError::Corrupted(format!("truncated structure: {e}")),
        }
    }
}
