use super::helpers::{create, fill, key, sorted_keys};
use crate::*;
use anyhow::Result;
use std::collections::HashSet;
use tempfile::tempdir;

#[test]
fn empty_database_has_no_first_key() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("empty.db"))?;

    assert_eq!(db.first_key()?, None);
    assert_eq!(db.keys().count(), 0);
    assert_eq!(db.count()?, 0);
    Ok(())
}

#[test]
fn single_key_iteration() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("single.db"))?;

    db.store(b"only", b"one", StoreMode::Insert)?;
    assert_eq!(db.first_key()?, Some(b"only".to_vec()));
    assert_eq!(db.next_key(b"only")?, None);
    Ok(())
}

#[test]
fn iteration_visits_every_key_once() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("every.db"))?;
    fill(&mut db, 500)?;

    let mut seen = HashSet::new();
    let mut next = db.first_key()?;
    while let Some(k) = next {
        assert!(seen.insert(k.clone()), "key visited twice");
        next = db.next_key(&k)?;
    }

    let expected: HashSet<Vec<u8>> = (0..500).map(key).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn keys_iterator_matches_first_next() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("iter.db"))?;
    fill(&mut db, 120)?;

    let mut manual = Vec::new();
    let mut next = db.first_key()?;
    while let Some(k) = next {
        next = db.next_key(&k)?;
        manual.push(k);
    }
    let collected = db.keys().collect::<crate::Result<Vec<_>>>()?;
    assert_eq!(manual, collected);
    Ok(())
}

#[test]
fn next_key_of_deleted_key_fails() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("deleted.db"))?;
    fill(&mut db, 10)?;

    let first = db.first_key()?.unwrap();
    db.delete(&first)?;
    assert!(matches!(db.next_key(&first), Err(DbError::ItemNotFound)));
    assert_eq!(db.last_error(), ErrorCode::ItemNotFound);
    Ok(())
}

#[test]
fn count_matches_iteration_after_deletes() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("count.db"))?;
    fill(&mut db, 300)?;
    for i in (0..300).filter(|i| i % 4 == 0) {
        db.delete(&key(i))?;
    }

    assert_eq!(db.count()?, 225);
    assert_eq!(sorted_keys(&mut db)?.len(), 225);
    Ok(())
}

#[test]
fn count_leaves_current_bucket_alone() -> Result<()> {
    let dir = tempdir()?;
    let mut db = create(&dir.path().join("current.db"))?;
    fill(&mut db, 200)?;

    db.fetch(&key(7))?;
    let current = db.cache.current().adr;
    db.count()?;
    assert_eq!(db.cache.current().adr, current);
    Ok(())
}
