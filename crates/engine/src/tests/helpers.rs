use crate::{Config, Database, OpenMode, StoreMode};
use anyhow::Result;
use std::fs;
use std::path::Path;

/// Smallest legal block size; buckets hold 17 slots, so splits come early.
pub const SMALL_BLOCK: u32 = 512;

pub fn small_config() -> Config {
    Config {
        block_size: SMALL_BLOCK,
        ..Config::default()
    }
}

pub fn direct_config() -> Config {
    Config {
        mmap: false,
        ..small_config()
    }
}

pub fn create(path: &Path) -> Result<Database> {
    Ok(Database::open(path, OpenMode::NewDb, &small_config())?)
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key-{i:05}").into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value-{i}-{}", "v".repeat(i % 13)).into_bytes()
}

pub fn fill(db: &mut Database, n: usize) -> Result<()> {
    for i in 0..n {
        db.store(&key(i), &value(i), StoreMode::Insert)?;
    }
    Ok(())
}

pub fn sorted_keys(db: &mut Database) -> Result<Vec<Vec<u8>>> {
    let mut keys = db.keys().collect::<crate::Result<Vec<_>>>()?;
    keys.sort();
    Ok(keys)
}

pub fn file_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}
