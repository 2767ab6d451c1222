//! # Config - BucketKV tuning knobs
//!
//! Every setting that influences how a database file is created or how a
//! handle behaves at runtime lives in [`Config`]. The engine copies the values
//! it needs at open time; the per-handle option setters change them later.
//!
//! ## Environment
//!
//! [`Config::from_env`] reads the following variables, falling back to the
//! default for anything unset or unparseable:
//!
//! | Variable                          | Field                   | Default      |
//! |-----------------------------------|-------------------------|--------------|
//! | `BUCKETKV_BLOCK_SIZE`             | `block_size`            | `0` (fs)     |
//! | `BUCKETKV_PERMISSIONS`            | `permissions` (octal)   | `644`        |
//! | `BUCKETKV_SYNC`                   | `sync`                  | `false`      |
//! | `BUCKETKV_LOCKING`                | `locking`               | `true`       |
//! | `BUCKETKV_ALLOW_UNLOCKED_READER`  | `allow_unlocked_reader` | `false`      |
//! | `BUCKETKV_MMAP`                   | `mmap`                  | `true`       |
//! | `BUCKETKV_MAX_MAP_SIZE`           | `max_map_size`          | unlimited    |
//! | `BUCKETKV_CACHE_SIZE`             | `cache_size`            | engine (100) |
//! | `BUCKETKV_CENTRAL_FREE`           | `central_free`          | `false`      |
//! | `BUCKETKV_COALESCE_BLOCKS`        | `coalesce_blocks`       | `false`      |

/// Prefix shared by every environment variable understood by [`Config::from_env`].
pub const ENV_PREFIX: &str = "BUCKETKV_";

/// Smallest bucket cache the engine will run with.
pub const MIN_CACHE_SIZE: usize = 10;

/// Handle and file-creation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Block size for newly created files. Values below 512 select the
    /// filesystem's preferred block size. Ignored for existing files.
    pub block_size: u32,
    /// Permission bits applied when the file is created.
    pub permissions: u32,
    /// When `true`, the header write at the end of each update is followed by
    /// an fsync.
    pub sync: bool,
    /// Acquire the whole-file advisory lock on open.
    pub locking: bool,
    /// Let a reader continue without a lock when no primitive succeeds.
    pub allow_unlocked_reader: bool,
    /// Use the memory-mapped I/O backend.
    pub mmap: bool,
    /// Largest window the mapped backend may map at once.
    pub max_map_size: u64,
    /// Bucket cache capacity. `None` lets the engine pick its default.
    pub cache_size: Option<usize>,
    /// Send every freed range to the file-wide avail table.
    pub central_free: bool,
    /// Merge adjacent free ranges when they are returned.
    pub coalesce_blocks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 0,
            permissions: 0o644,
            sync: false,
            locking: true,
            allow_unlocked_reader: false,
            mmap: true,
            max_map_size: u64::MAX,
            cache_size: None,
            central_free: false,
            coalesce_blocks: false,
        }
    }
}

impl Config {
    /// Builds a config from `BUCKETKV_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    ///
    /// `lookup` receives full variable names (prefix included) and returns
    /// `None` for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let env_or = |name: &str, default: String| -> String {
            lookup(&format!("{ENV_PREFIX}{name}")).unwrap_or(default)
        };

        let permissions = u32::from_str_radix(
            env_or("PERMISSIONS", format!("{:o}", d.permissions)).trim(),
            8,
        )
        .unwrap_or(d.permissions);

        let cache_size = lookup(&format!("{ENV_PREFIX}CACHE_SIZE"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .or(d.cache_size);

        Self {
            block_size: parse_or(env_or("BLOCK_SIZE", d.block_size.to_string()), d.block_size),
            permissions,
            sync: parse_or(env_or("SYNC", d.sync.to_string()), d.sync),
            locking: parse_or(env_or("LOCKING", d.locking.to_string()), d.locking),
            allow_unlocked_reader: parse_or(
                env_or("ALLOW_UNLOCKED_READER", d.allow_unlocked_reader.to_string()),
                d.allow_unlocked_reader,
            ),
            mmap: parse_or(env_or("MMAP", d.mmap.to_string()), d.mmap),
            max_map_size: parse_or(
                env_or("MAX_MAP_SIZE", d.max_map_size.to_string()),
                d.max_map_size,
            ),
            cache_size,
            central_free: parse_or(env_or("CENTRAL_FREE", d.central_free.to_string()), d.central_free),
            coalesce_blocks: parse_or(
                env_or("COALESCE_BLOCKS", d.coalesce_blocks.to_string()),
                d.coalesce_blocks,
            ),
        }
    }

    /// Returns the configured cache size clamped to [`MIN_CACHE_SIZE`], or
    /// `default` when none was configured.
    #[must_use]
    pub fn effective_cache_size(&self, default: usize) -> usize {
        self.cache_size.unwrap_or(default).max(MIN_CACHE_SIZE)
    }
}

fn parse_or<T: std::str::FromStr>(raw: String, default: T) -> T {
    raw.trim().parse().unwrap_or(default)
}
