use super::helpers::{create, file_bytes, key, small_config, value, SMALL_BLOCK};
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Store / fetch ---------------------

#[test]
fn store_and_fetch_three_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("abc.db"))?;

    db.store(b"a", b"1", StoreMode::Insert)?;
    db.store(b"b", b"2", StoreMode::Insert)?;
    db.store(b"c", b"3", StoreMode::Insert)?;

    assert_eq!(db.fetch(b"a")?, b"1");
    assert_eq!(db.fetch(b"b")?, b"2");
    assert_eq!(db.fetch(b"c")?, b"3");
    assert_eq!(db.count()?, 3);
    Ok(())
}

#[test]
fn small_records_come_from_the_seeded_block() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("seed.db"))?;
    let bs = u64::from(SMALL_BLOCK);

    db.store(b"a", b"1", StoreMode::Insert)?;
    db.store(b"b", b"2", StoreMode::Insert)?;
    db.store(b"c", b"3", StoreMode::Insert)?;

    // Everything fits in block 3, so the file does not grow.
    assert_eq!(db.header.next_block, 4 * bs);
    let pointers: Vec<u64> = db
        .cache
        .current()
        .bucket
        .table
        .iter()
        .map(|(_, e)| e.data_pointer)
        .collect();
    assert!(pointers.iter().all(|&p| (3 * bs..4 * bs).contains(&p)));
    assert_eq!(db.cache.current().bucket.avail.total_bytes(), bs - 6);
    Ok(())
}

#[test]
fn fetch_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("miss.db"))?;

    assert!(matches!(db.fetch(b"nope"), Err(DbError::ItemNotFound)));
    assert_eq!(db.last_error(), ErrorCode::ItemNotFound);
    assert!(!db.exists(b"nope")?);
    assert_eq!(db.last_error(), ErrorCode::NoError);
    Ok(())
}

#[test]
fn insert_does_not_overwrite() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("insert.db"))?;

    db.store(b"k", b"first", StoreMode::Insert)?;
    let err = db.store(b"k", b"second", StoreMode::Insert).unwrap_err();
    assert!(matches!(err, DbError::CannotReplace));
    assert_eq!(db.last_error(), ErrorCode::CannotReplace);
    assert_eq!(db.fetch(b"k")?, b"first");
    Ok(())
}

#[test]
fn replace_overwrites() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("replace.db"))?;

    db.store(b"k", b"short", StoreMode::Replace)?;
    db.store(b"k", b"a considerably longer value", StoreMode::Replace)?;
    assert_eq!(db.fetch(b"k")?, b"a considerably longer value");
    db.store(b"k", b"tiny", StoreMode::Replace)?;
    assert_eq!(db.fetch(b"k")?, b"tiny");
    assert_eq!(db.count()?, 1);
    Ok(())
}

#[test]
fn same_size_replace_reuses_space() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("reuse.db"))?;

    db.store(b"key", b"0123456789", StoreMode::Insert)?;
    let before = db.verify()?;
    let next_block = db.header.next_block;

    db.store(b"key", b"abcdefghij", StoreMode::Replace)?;
    let after = db.verify()?;

    assert_eq!(db.fetch(b"key")?, b"abcdefghij");
    assert_eq!(db.header.next_block, next_block);
    assert_eq!(after.free_bytes, before.free_bytes);
    Ok(())
}

#[test]
fn empty_key_and_empty_value() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("empty.db"))?;

    db.store(b"", b"no key", StoreMode::Insert)?;
    db.store(b"no value", b"", StoreMode::Insert)?;

    assert_eq!(db.fetch(b"")?, b"no key");
    assert_eq!(db.fetch(b"no value")?, b"");
    assert!(db.exists(b"")?);
    db.verify()?;
    Ok(())
}

#[test]
fn keys_sharing_a_prefix_are_distinct() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("prefix.db"))?;

    // Same first four bytes, so only the full key comparison tells them apart.
    db.store(b"abcd1", b"one", StoreMode::Insert)?;
    db.store(b"abcd2", b"two", StoreMode::Insert)?;
    db.store(b"abcd", b"base", StoreMode::Insert)?;

    assert_eq!(db.fetch(b"abcd1")?, b"one");
    assert_eq!(db.fetch(b"abcd2")?, b"two");
    assert_eq!(db.fetch(b"abcd")?, b"base");
    assert!(!db.exists(b"abcd3")?);
    Ok(())
}

#[test]
fn value_larger_than_a_block() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("large.db"))?;

    let big: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    db.store(b"big", &big, StoreMode::Insert)?;
    db.store(b"small", b"s", StoreMode::Insert)?;

    assert_eq!(db.fetch(b"big")?, big);
    assert_eq!(db.fetch(b"small")?, b"s");
    db.verify()?;
    Ok(())
}

#[test]
fn binary_keys_with_high_bytes() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("binary.db"))?;

    let keys: [&[u8]; 4] = [b"\xff", b"\x80abc", b"\x00\x00", b"\xfe\xfd\xfc\xfb\xfa"];
    for (i, k) in keys.iter().enumerate() {
        db.store(k, &[i as u8], StoreMode::Insert)?;
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(db.fetch(k)?, vec![i as u8]);
    }
    Ok(())
}

#[test]
fn record_sizes_the_allocator_cannot_place_are_refused_first() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("limits.db"))?;
    db.store(b"k", b"old value", StoreMode::Insert)?;
    let before = db.verify()?;

    // Whole blocks of 512 bytes reach at most u32::MAX - 511.
    let largest = (u32::MAX - 511) as usize;
    assert_eq!(db.checked_record_size(0, largest)?, (largest as u32, largest as u32));
    assert!(matches!(
        db.checked_record_size(1, largest),
        Err(DbError::IllegalData(_))
    ));
    assert!(matches!(
        db.checked_record_size(1, u32::MAX as usize),
        Err(DbError::IllegalData(_))
    ));

    // A refused size leaves the allocator and the existing record alone.
    assert!(!db.dirty.any());
    assert_eq!(db.verify()?.free_bytes, before.free_bytes);
    assert_eq!(db.fetch(b"k")?, b"old value");
    Ok(())
}

// --------------------- Delete ---------------------

#[test]
fn delete_removes_key() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("delete.db"))?;

    db.store(b"k", b"v", StoreMode::Insert)?;
    db.delete(b"k")?;

    assert!(!db.exists(b"k")?);
    assert!(matches!(db.fetch(b"k"), Err(DbError::ItemNotFound)));
    assert_eq!(db.count()?, 0);
    Ok(())
}

#[test]
fn delete_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("delete_missing.db"))?;

    assert!(matches!(db.delete(b"ghost"), Err(DbError::ItemNotFound)));
    assert_eq!(db.last_error(), ErrorCode::ItemNotFound);
    assert!(!db.is_poisoned());
    Ok(())
}

#[test]
fn delete_then_insert_again() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("reinsert.db"))?;

    db.store(b"k", b"old value", StoreMode::Insert)?;
    db.delete(b"k")?;
    db.store(b"k", b"new value", StoreMode::Insert)?;
    assert_eq!(db.fetch(b"k")?, b"new value");
    Ok(())
}

#[test]
fn delete_keeps_colliding_keys_reachable() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("chain.db"))?;

    for i in 0..12 {
        db.store(&key(i), &value(i), StoreMode::Insert)?;
    }
    for i in (0..12).step_by(3) {
        db.delete(&key(i))?;
    }
    for i in 0..12 {
        assert_eq!(db.exists(&key(i))?, i % 3 != 0, "key {i}");
    }
    db.verify()?;
    Ok(())
}

#[test]
fn deleted_space_is_reused() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("reuse_deleted.db"))?;

    db.store(b"k", &[7u8; 300], StoreMode::Insert)?;
    db.delete(b"k")?;
    let next_block = db.header.next_block;
    db.store(b"j", &[8u8; 290], StoreMode::Insert)?;

    assert_eq!(db.header.next_block, next_block);
    db.verify()?;
    Ok(())
}

// --------------------- Readers ---------------------

#[test]
fn reader_cannot_modify() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("readonly.db");
    {
        let mut db = create(&path)?;
        db.store(b"k", b"v", StoreMode::Insert)?;
        db.close()?;
    }
    let before = file_bytes(&path);

    let mut reader = Database::open(&path, OpenMode::Reader, &small_config())?;
    assert!(matches!(
        reader.store(b"x", b"y", StoreMode::Insert),
        Err(DbError::ReaderCantStore)
    ));
    assert_eq!(reader.last_error(), ErrorCode::ReaderCantStore);
    assert!(matches!(reader.delete(b"k"), Err(DbError::ReaderCantDelete)));
    assert_eq!(reader.fetch(b"k")?, b"v");
    reader.close()?;

    assert_eq!(file_bytes(&path), before);
    Ok(())
}

#[test]
fn contents_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("reopen.db");
    {
        let mut db = create(&path)?;
        for i in 0..200 {
            db.store(&key(i), &value(i), StoreMode::Insert)?;
        }
        db.close()?;
    }

    let mut db = Database::open(&path, OpenMode::Writer, &small_config())?;
    assert_eq!(db.count()?, 200);
    for i in 0..200 {
        assert_eq!(db.fetch(&key(i))?, value(i));
    }
    db.verify()?;
    Ok(())
}

#[test]
fn drop_flushes_like_close() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("drop.db");
    {
        let mut db = create(&path)?;
        db.store(b"kept", b"after drop", StoreMode::Insert)?;
    }

    let mut db = Database::open(&path, OpenMode::Reader, &small_config())?;
    assert_eq!(db.fetch(b"kept")?, b"after drop");
    Ok(())
}
