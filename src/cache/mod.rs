//! Content-addressed memoization.
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`digest`] | [`Digestible`], [`digest()`], [`DigestOptions`] |
//! | [`store`] | [`Cache`], [`CacheStore`], [`MemoryCache`], [`DiskCache`], [`CacheFilter`] |
//! | [`memo`] | [`Cache::run_cached`], [`Granularity`], [`Cached`] |
//!
//! Cache failures are optimizations failing, never correctness failures: the
//! engine downgrades every [`CacheError`] to a warning and executes.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod digest;
pub mod memo;
pub mod store;

pub use digest::{digest, Digest, DigestAlgorithm, DigestOptions, Digestible};
pub use memo::{CacheSource, Cached, Granularity};
pub use store::{
    Cache, CacheEntry, CacheFilter, CacheRecord, CacheStore, DiskCache, MemoryCache, TAG_CLASS,
    TAG_FUNCTION, TAG_GRANULARITY,
};

#[derive(Debug, Error)]
pub enum CacheError {
    /// The input could not be reduced to a reproducible digest.
    #[error("cannot digest input: {0}")]
    DigestFailure(String),

    #[error("cache i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored artifact or the tag index could not be read back.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
