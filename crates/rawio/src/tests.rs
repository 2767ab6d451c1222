use crate::*;
use anyhow::Result;
use std::fs::OpenOptions;
use std::path::Path;
use tempfile::tempdir;

fn open_rw(path: &Path) -> Result<RawFile> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(RawFile::new(file, true))
}

fn open_ro(path: &Path) -> Result<RawFile> {
    let file = OpenOptions::new().read(true).open(path)?;
    Ok(RawFile::new(file, false))
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

// -------------------- Direct backend --------------------

#[test]
fn direct_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let mut f = open_rw(&dir.path().join("db"))?;
    let data = pattern(3000, 7);
    f.write_at(100, &data)?;

    let mut back = vec![0u8; data.len()];
    f.read_at(100, &mut back)?;
    assert_eq!(back, data);
    assert_eq!(f.file_size()?, 3100);
    assert!(!f.is_mapped());
    Ok(())
}

#[test]
fn short_read_is_eof() -> Result<()> {
    let dir = tempdir()?;
    let mut f = open_rw(&dir.path().join("db"))?;
    f.write_at(0, b"abc")?;
    let mut buf = [0u8; 8];
    assert!(matches!(f.read_at(0, &mut buf), Err(RawIoError::Eof)));
    Ok(())
}

#[test]
fn read_only_rejects_writes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    open_rw(&path)?.write_at(0, b"hello")?;

    let mut f = open_ro(&path)?;
    assert!(matches!(f.write_at(0, b"x"), Err(RawIoError::Write(_))));
    let mut buf = [0u8; 5];
    f.read_at(0, &mut buf)?;
    assert_eq!(&buf, b"hello");
    Ok(())
}

// -------------------- Mapped backend --------------------

#[test]
fn mapped_write_grows_to_extent_hint() -> Result<()> {
    let dir = tempdir()?;
    let mut f = open_rw(&dir.path().join("db"))?;
    f.write_at(0, &[1u8; 512])?;
    f.enable_mapping()?;
    assert!(f.is_mapped());

    f.set_extent_hint(8192);
    f.write_at(1024, b"payload")?;
    assert_eq!(f.file_size()?, 8192);

    let mut buf = [0u8; 7];
    f.read_at(1024, &mut buf)?;
    assert_eq!(&buf, b"payload");
    f.sync()?;
    Ok(())
}

#[test]
fn mapped_and_direct_see_the_same_bytes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let data = pattern(10_000, 3);
    {
        let mut f = open_rw(&path)?;
        f.write_at(0, &[0u8; 16])?;
        f.enable_mapping()?;
        f.write_at(16, &data)?;
        f.sync()?;
    }

    let mut f = open_ro(&path)?;
    let mut back = vec![0u8; data.len()];
    f.read_at(16, &mut back)?;
    assert_eq!(back, data);
    Ok(())
}

#[test]
fn small_window_spans_several_pages() -> Result<()> {
    let dir = tempdir()?;
    let mut f = open_rw(&dir.path().join("db"))?;
    let page = page_size() as usize;
    let data = pattern(page * 3 + 123, 11);
    f.write_at(0, &data)?;

    f.enable_mapping()?;
    f.set_max_map_size(1)?;
    assert_eq!(f.max_map_size(), page as u64);

    let offset = page / 2 + 5;
    let mut back = vec![0u8; page * 2];
    f.read_at(offset as u64, &mut back)?;
    assert_eq!(&back[..], &data[offset..offset + page * 2]);

    let patch = pattern(page + 10, 99);
    f.write_at((page - 3) as u64, &patch)?;
    let mut check = vec![0u8; patch.len()];
    f.read_at((page - 3) as u64, &mut check)?;
    assert_eq!(check, patch);
    Ok(())
}

#[test]
fn reader_maps_read_only() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let data = pattern(5000, 1);
    open_rw(&path)?.write_at(0, &data)?;

    let mut f = open_ro(&path)?;
    f.enable_mapping()?;
    let mut back = vec![0u8; 100];
    f.read_at(4900, &mut back)?;
    assert_eq!(&back[..], &data[4900..]);

    let mut past_end = [0u8; 10];
    assert!(matches!(f.read_at(4995, &mut past_end), Err(RawIoError::Eof)));
    assert!(f.write_at(0, b"x").is_err());
    Ok(())
}

#[test]
fn disabling_mapping_keeps_position() -> Result<()> {
    let dir = tempdir()?;
    let mut f = open_rw(&dir.path().join("db"))?;
    f.write_at(0, b"0123456789")?;
    f.enable_mapping()?;
    f.seek(SeekFrom::Start(4))?;
    f.disable_mapping()?;
    assert!(!f.is_mapped());

    let mut buf = [0u8; 3];
    f.full_read(&mut buf)?;
    assert_eq!(&buf, b"456");
    Ok(())
}

#[test]
fn seek_variants_in_mapped_mode() -> Result<()> {
    let dir = tempdir()?;
    let mut f = open_rw(&dir.path().join("db"))?;
    f.write_at(0, b"abcdefghij")?;
    f.enable_mapping()?;

    assert_eq!(f.seek(SeekFrom::Start(2))?, 2);
    assert_eq!(f.seek(SeekFrom::Current(3))?, 5);
    assert_eq!(f.seek(SeekFrom::End(-1))?, 9);
    let mut buf = [0u8; 1];
    f.full_read(&mut buf)?;
    assert_eq!(&buf, b"j");
    assert!(f.seek(SeekFrom::Current(-100)).is_err());
    Ok(())
}

#[test]
fn page_rounding() {
    let page = page_size();
    assert_eq!(round_to_page(1), page);
    assert_eq!(round_to_page(page), page);
    assert_eq!(round_to_page(page + 1), 2 * page);
    assert_eq!(round_to_page(u64::MAX), u64::MAX);
}
