//! Cache stores and the tag-queryable [`Cache`] front end.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::value::Value;

use super::digest::{digest, Digest, DigestOptions, Digestible};
use super::CacheError;

/// Tag holding the name of the cached function.
pub const TAG_FUNCTION: &str = "function";
/// Tag holding the class (type name) of the artifact.
pub const TAG_CLASS: &str = "class";
/// Tag holding the granularity the entry was cached at.
pub const TAG_GRANULARITY: &str = "granularity";

const INDEX_FILE: &str = "index.json";

// ── Entries ───────────────────────────────────────────────────────────

/// Index row of a cache entry: everything but the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub digest: Digest,
    pub tags: IndexMap<String, String>,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl CacheRecord {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn function(&self) -> Option<&str> {
        self.tag(TAG_FUNCTION)
    }
}

/// A stored artifact with its index row.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub record: CacheRecord,
    pub artifact: Value,
}

// ── Stores ────────────────────────────────────────────────────────────

/// Storage backend for cache entries, keyed by exact digest.
pub trait CacheStore: Send {
    fn lookup(&mut self, digest: &Digest) -> Result<Option<CacheEntry>, CacheError>;
    fn store(&mut self, entry: CacheEntry) -> Result<(), CacheError>;
    fn records(&self) -> Vec<CacheRecord>;
    fn remove(&mut self, digest: &Digest) -> Result<bool, CacheError>;
}

/// Entries kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: IndexMap<Digest, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }
}

impl CacheStore for MemoryCache {
    fn lookup(&mut self, digest: &Digest) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(digest).cloned())
    }

    fn store(&mut self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(entry.record.digest.clone(), entry);
        Ok(())
    }

    fn records(&self) -> Vec<CacheRecord> {
        self.entries.values().map(|e| e.record.clone()).collect()
    }

    fn remove(&mut self, digest: &Digest) -> Result<bool, CacheError> {
        Ok(self.entries.shift_remove(digest).is_some())
    }
}

/// Entries on disk: one bincode artifact file per digest plus a JSON tag
/// index, so the index can be inspected without loading artifacts.
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    index: IndexMap<Digest, CacheRecord>,
}

impl DiskCache {
    /// Open (or create) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let file = File::open(&index_path).map_err(|e| CacheError::io(&index_path, e))?;
            let records: Vec<CacheRecord> = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| CacheError::Corrupt(format!("{}: {}", index_path.display(), e)))?;
            records.into_iter().map(|r| (r.digest.clone(), r)).collect()
        } else {
            IndexMap::new()
        };
        debug!(dir = %dir.display(), entries = index.len(), "disk cache opened");
        Ok(DiskCache { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, digest: &Digest) -> PathBuf {
        self.dir.join(format!("{}.bin", digest))
    }

    fn write_index(&self) -> Result<(), CacheError> {
        let path = self.dir.join(INDEX_FILE);
        let file = File::create(&path).map_err(|e| CacheError::io(&path, e))?;
        let records: Vec<&CacheRecord> = self.index.values().collect();
        serde_json::to_writer_pretty(BufWriter::new(file), &records)
            .map_err(|e| CacheError::Corrupt(e.to_string()))
    }
}

impl CacheStore for DiskCache {
    fn lookup(&mut self, digest: &Digest) -> Result<Option<CacheEntry>, CacheError> {
        let Some(record) = self.index.get(digest).cloned() else {
            return Ok(None);
        };
        let path = self.artifact_path(digest);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(digest = %digest, "cache artifact missing; dropping index entry");
                self.index.shift_remove(digest);
                self.write_index()?;
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        let artifact: Value = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| CacheError::Corrupt(format!("{}: {}", path.display(), e)))?;
        Ok(Some(CacheEntry { record, artifact }))
    }

    fn store(&mut self, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.artifact_path(&entry.record.digest);
        let file = File::create(&path).map_err(|e| CacheError::io(&path, e))?;
        bincode::serialize_into(BufWriter::new(file), &entry.artifact)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        self.index
            .insert(entry.record.digest.clone(), entry.record);
        self.write_index()
    }

    fn records(&self) -> Vec<CacheRecord> {
        self.index.values().cloned().collect()
    }

    fn remove(&mut self, digest: &Digest) -> Result<bool, CacheError> {
        if self.index.shift_remove(digest).is_none() {
            return Ok(false);
        }
        let path = self.artifact_path(digest);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&path, e)),
        }
        self.write_index()?;
        Ok(true)
    }
}

// ── Filters ───────────────────────────────────────────────────────────

/// Selects cache records by tag, creation time range and function name.
/// Criteria combine with AND; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheFilter {
    pub tags: Vec<(String, String)>,
    pub function: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub after: Option<u64>,
    /// Exclusive upper bound on `created_at`.
    pub before: Option<u64>,
}

impl CacheFilter {
    pub fn new() -> Self {
        CacheFilter::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    pub fn after(mut self, millis: u64) -> Self {
        self.after = Some(millis);
        self
    }

    pub fn before(mut self, millis: u64) -> Self {
        self.before = Some(millis);
        self
    }

    pub fn matches(&self, record: &CacheRecord) -> bool {
        self.tags.iter().all(|(k, v)| record.tag(k) == Some(v.as_str()))
            && self
                .function
                .as_deref()
                .map_or(true, |f| record.function() == Some(f))
            && self.after.map_or(true, |t| record.created_at >= t)
            && self.before.map_or(true, |t| record.created_at < t)
    }
}

// ── Cache ─────────────────────────────────────────────────────────────

/// A cache store plus the digest options used to key it.
pub struct Cache {
    store: Box<dyn CacheStore>,
    options: DigestOptions,
}

impl Cache {
    pub fn new(store: impl CacheStore + 'static, options: DigestOptions) -> Self {
        Cache {
            store: Box::new(store),
            options,
        }
    }

    pub fn in_memory(options: DigestOptions) -> Self {
        Cache::new(MemoryCache::new(), options)
    }

    pub fn on_disk(dir: impl Into<PathBuf>, options: DigestOptions) -> Result<Self, CacheError> {
        Ok(Cache::new(DiskCache::open(dir)?, options))
    }

    pub fn options(&self) -> &DigestOptions {
        &self.options
    }

    /// Digest `value` with this cache's options.
    pub fn digest<T: Digestible + ?Sized>(&self, value: &T) -> Result<Digest, CacheError> {
        digest(value, &self.options)
    }

    pub fn lookup(&mut self, digest: &Digest) -> Result<Option<CacheEntry>, CacheError> {
        self.store.lookup(digest)
    }

    /// Store `artifact` under `digest` with `tags`. The `class` tag is filled
    /// in from the artifact when absent.
    pub fn store(
        &mut self,
        digest: Digest,
        artifact: Value,
        mut tags: IndexMap<String, String>,
    ) -> Result<(), CacheError> {
        tags.entry(TAG_CLASS.to_string())
            .or_insert_with(|| artifact.type_name().to_string());
        let record = CacheRecord {
            digest,
            tags,
            created_at: crate::time::unix_millis(),
        };
        self.store.store(CacheEntry { record, artifact })
    }

    pub fn len(&self) -> usize {
        self.store.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records matching `filter`, oldest first.
    pub fn show(&self, filter: &CacheFilter) -> Vec<CacheRecord> {
        let mut records: Vec<CacheRecord> = self
            .store
            .records()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Remove every entry matching `filter`. Returns how many were removed.
    pub fn clear(&mut self, filter: &CacheFilter) -> Result<usize, CacheError> {
        self.remove_where(|r| filter.matches(r))
    }

    /// Remove every entry NOT matching `filter`. Returns how many were removed.
    pub fn keep(&mut self, filter: &CacheFilter) -> Result<usize, CacheError> {
        self.remove_where(|r| !filter.matches(r))
    }

    fn remove_where(&mut self, doomed: impl Fn(&CacheRecord) -> bool) -> Result<usize, CacheError> {
        let mut removed = 0;
        for record in self.store.records().into_iter().filter(|r| doomed(r)) {
            if self.store.remove(&record.digest)? {
                removed += 1;
            }
        }
        debug!(removed, "cache entries removed");
        Ok(removed)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.len())
            .field("options", &self.options)
            .finish()
    }
}
