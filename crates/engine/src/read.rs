/// Read path: `fetch()`, `exists()`, key iteration and `count()`.
///
/// A lookup hashes the key, follows the directory to its bucket (loading it
/// through the cache), then probes the bucket's slot table from the key's
/// home slot. Slots whose stored hash, length and leading key bytes agree are
/// confirmed by reading the full record; the last record read per bucket is
/// kept in the slot's data cache.
///
/// Iteration walks the directory in index order and each bucket in slot
/// order. The order is unspecified to callers and changes after stores.
use crate::cache::DataCache;
use crate::error::{DbError, Result};
use crate::Database;

impl Database {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`DbError::ItemNotFound`] if the key is absent, or an I/O error while
    /// reading the bucket or record.
    pub fn fetch(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.begin()?;
        let result = self.fetch_value(key);
        self.track(result)
    }

    /// `true` if `key` is present. A miss is not an error.
    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        self.begin()?;
        let result = self.find_key(key).map(|loc| loc.is_some());
        self.track(result)
    }

    /// First key in iteration order, or `None` for an empty database.
    pub fn first_key(&mut self) -> Result<Option<Vec<u8>>> {
        self.begin()?;
        let result = self.scan_from(0, 0);
        self.track(result)
    }

    /// Key following `key` in iteration order, or `None` after the last one.
    ///
    /// # Errors
    ///
    /// [`DbError::ItemNotFound`] if `key` is no longer in the database.
    pub fn next_key(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.begin()?;
        let result = self.key_after(key);
        self.track(result)
    }

    /// Iterator over every key, built on [`first_key`](Self::first_key) and
    /// [`next_key`](Self::next_key). Stops after the first error.
    pub fn keys(&mut self) -> Keys<'_> {
        Keys {
            db: self,
            last: None,
            done: false,
        }
    }

    /// Number of records, summed over the buckets without changing which
    /// bucket is current.
    pub fn count(&mut self) -> Result<u64> {
        self.begin()?;
        let result = self.count_records();
        self.track(result)
    }

    pub(crate) fn fetch_value(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        match self.find_key(key)? {
            Some(loc) => Ok(self.read_entry(loc)?.value().to_vec()),
            None => Err(DbError::ItemNotFound),
        }
    }

    pub(crate) fn key_after(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let loc = self.find_key(key)?.ok_or(DbError::ItemNotFound)?;
        self.scan_from(self.bucket_dir, loc + 1)
    }

    fn count_records(&mut self) -> Result<u64> {
        let mut total = 0u64;
        for adr in self.dir.unique_buckets() {
            total += self.peek_bucket(adr)?.count() as u64;
        }
        Ok(total)
    }

    /// Locates `key` in its bucket, leaving that bucket current.
    ///
    /// Returns the slot index, or `None` if the key is absent.
    pub(crate) fn find_key(&mut self, key: &[u8]) -> Result<Option<usize>> {
        let hash = layout::hash(key);
        self.get_bucket(self.dir.index_for(hash))?;

        if let Some(data) = &self.cache.current().data {
            if data.hash == hash && data.key() == key {
                return Ok(Some(data.elem_loc));
            }
        }

        let candidates: Vec<usize> = self
            .cache
            .current()
            .bucket
            .table
            .chain(hash)
            .filter(|(_, elem)| elem.may_match(hash, key))
            .map(|(loc, _)| loc)
            .collect();

        for loc in candidates {
            if self.read_entry(loc)?.key() == key {
                return Ok(Some(loc));
            }
        }
        Ok(None)
    }

    /// Reads the record in slot `loc` of the current bucket into its data
    /// cache.
    pub(crate) fn read_entry(&mut self, loc: usize) -> Result<&DataCache> {
        let cached = matches!(&self.cache.current().data, Some(d) if d.elem_loc == loc);
        if !cached {
            let elem = *self
                .cache
                .current()
                .bucket
                .table
                .get(loc)
                .ok_or_else(|| DbError::Corrupted(format!("slot {loc} is empty")))?;

            let len = usize::try_from(elem.record_len())
                .map_err(|_| DbError::Corrupted("record length overflows".into()))?;
            let mut bytes = vec![0u8; len];
            self.io.read_at(elem.data_pointer, &mut bytes)?;

            self.cache.current_mut().data = Some(DataCache {
                hash: elem.hash,
                elem_loc: loc,
                key_size: elem.key_size as usize,
                bytes,
            });
        }
        self.cache
            .current()
            .data
            .as_ref()
            .ok_or_else(|| DbError::Corrupted("record cache empty".into()))
    }

    /// First occupied slot at or after (`dir_index`, `loc`), moving on to the
    /// next distinct bucket when one runs out.
    pub(crate) fn scan_from(&mut self, mut dir_index: usize, mut loc: usize) -> Result<Option<Vec<u8>>> {
        loop {
            self.get_bucket(dir_index)?;
            if let Some(found) = self.cache.current().bucket.table.next_occupied(loc) {
                return Ok(Some(self.read_entry(found)?.key().to_vec()));
            }

            // Skip the rest of the directory run naming this bucket.
            let adr = self.dir.get(dir_index);
            dir_index += 1;
            while dir_index < self.dir.len() && self.dir.get(dir_index) == adr {
                dir_index += 1;
            }
            if dir_index >= self.dir.len() {
                return Ok(None);
            }
            loc = 0;
        }
    }
}

/// Iterator returned by [`Database::keys`].
pub struct Keys<'a> {
    db: &'a mut Database,
    last: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for Keys<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.last.as_deref() {
            Some(prev) => self.db.next_key(prev),
            None => self.db.first_key(),
        };

        match step {
            Ok(Some(key)) => {
                self.last = Some(key.clone());
                Some(Ok(key))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
