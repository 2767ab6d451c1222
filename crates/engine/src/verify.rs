//! Structural consistency check.
//!
//! Walks the directory, every bucket, the header avail table and the overflow
//! stack, and checks that:
//!
//! - each bucket with `b` local bits owns one aligned run of
//!   `2^(dir_bits - b)` directory entries and appears nowhere else;
//! - every key's hash prefix selects an entry inside its bucket's run, and
//!   the key is reachable by probing from its home slot;
//! - header, directory, buckets, records, overflow blocks and free ranges
//!   never overlap and all lie below `next_block`.

use crate::error::{DbError, Result};
use crate::Database;
use layout::AvailBlock;
use std::collections::HashSet;

/// Summary produced by [`Database::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Consistency {
    pub buckets: usize,
    pub records: u64,
    /// Bytes tracked as free in bucket, header and overflow avail tables.
    pub free_bytes: u64,
    pub overflow_blocks: usize,
}

struct Extent {
    start: u64,
    end: u64,
    what: &'static str,
}

impl Database {
    /// Checks the file structure and reports what it found.
    ///
    /// # Errors
    ///
    /// [`DbError::Corrupted`] describing the first violation, or an I/O
    /// error while reading buckets or overflow blocks.
    pub fn verify(&mut self) -> Result<Consistency> {
        self.begin()?;
        let result = self.check_structure();
        self.track(result)
    }

    fn check_structure(&mut self) -> Result<Consistency> {
        let mut report = Consistency::default();
        let mut extents = vec![
            Extent {
                start: 0,
                end: u64::from(self.header.block_size),
                what: "header",
            },
            Extent {
                start: self.header.dir,
                end: self.header.dir + u64::from(self.header.dir_size),
                what: "directory",
            },
        ];

        let bucket_size = u64::from(self.header.bucket_size);
        let entries = self.dir.entries().to_vec();
        let mut seen = HashSet::new();
        let mut index = 0;
        while index < entries.len() {
            let adr = entries[index];
            let bucket = self.peek_bucket(adr)?;
            if bucket.bits > self.dir.bits() {
                return Err(corrupt(format!(
                    "bucket at {adr} has {} bits, directory has {}",
                    bucket.bits,
                    self.dir.bits()
                )));
            }

            let run = self.dir.run_for(index, bucket.bits);
            if run.start != index || entries[run.clone()].iter().any(|&a| a != adr) {
                return Err(corrupt(format!(
                    "bucket at {adr} does not own directory entries {run:?}"
                )));
            }
            if !seen.insert(adr) {
                return Err(corrupt(format!("bucket at {adr} appears in two runs")));
            }

            for (loc, elem) in bucket.table.iter() {
                if !run.contains(&self.dir.index_for(elem.hash)) {
                    return Err(corrupt(format!(
                        "hash {:#x} in bucket at {adr} belongs to another bucket",
                        elem.hash
                    )));
                }
                if !bucket.table.chain(elem.hash).any(|(l, _)| l == loc) {
                    return Err(corrupt(format!(
                        "slot {loc} of bucket at {adr} is unreachable from its home"
                    )));
                }
                extents.push(Extent {
                    start: elem.data_pointer,
                    end: elem.data_pointer + elem.record_len(),
                    what: "record",
                });
            }

            extents.push(Extent {
                start: adr,
                end: adr + bucket_size,
                what: "bucket",
            });
            for elem in bucket.avail.entries() {
                extents.push(Extent {
                    start: elem.adr,
                    end: elem.end(),
                    what: "bucket free range",
                });
            }

            report.buckets += 1;
            report.records += bucket.count() as u64;
            report.free_bytes += bucket.avail.total_bytes();
            index = run.end;
        }

        for elem in self.header.avail.table.entries() {
            extents.push(Extent {
                start: elem.adr,
                end: elem.end(),
                what: "header free range",
            });
        }
        report.free_bytes += self.header.avail.table.total_bytes();

        let capacity = AvailBlock::spill_capacity(self.header.avail.table.capacity());
        let block_len = AvailBlock::encoded_len(capacity);
        let max_blocks = self.header.next_block / block_len as u64;
        let mut next = self.header.avail.next;
        while next != 0 {
            if report.overflow_blocks as u64 > max_blocks {
                return Err(corrupt("overflow avail stack loops".to_string()));
            }
            let mut raw = vec![0u8; block_len];
            self.io.read_at(next, &mut raw)?;
            let block = AvailBlock::decode(&raw, capacity)?;

            extents.push(Extent {
                start: next,
                end: next + block_len as u64,
                what: "overflow block",
            });
            for elem in block.table.entries() {
                extents.push(Extent {
                    start: elem.adr,
                    end: elem.end(),
                    what: "overflow free range",
                });
            }
            report.free_bytes += block.table.total_bytes();
            report.overflow_blocks += 1;
            next = block.next;
        }

        check_extents(extents, self.header.next_block)?;
        Ok(report)
    }
}

fn check_extents(mut extents: Vec<Extent>, next_block: u64) -> Result<()> {
    extents.retain(|e| e.end > e.start);
    extents.sort_by_key(|e| (e.start, e.end));

    for extent in &extents {
        if extent.end > next_block {
            return Err(corrupt(format!(
                "{} [{}, {}) extends past next_block {next_block}",
                extent.what, extent.start, extent.end
            )));
        }
    }
    for pair in extents.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.end > b.start {
            return Err(corrupt(format!(
                "{} [{}, {}) overlaps {} [{}, {})",
                a.what, a.start, a.end, b.what, b.start, b.end
            )));
        }
    }
    Ok(())
}

fn corrupt(what: String) -> DbError {
    DbError::Corrupted(what)
}
