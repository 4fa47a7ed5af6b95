//! Engine configuration.
//!
//! Everything the engine would otherwise read from process-wide options is
//! carried by an [`EngineConfig`] handed to the simulation builder. All
//! fields have defaults, so a JSON document only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::DigestOptions;
use crate::checkpoint::CheckpointPolicy;
use crate::error::{EngineError, EngineResult};
use crate::eventlog::DEFAULT_COMPLETED_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub policy: CheckpointPolicy,
    /// Snapshots retained in memory.
    pub capacity: usize,
    /// When set, every automatic checkpoint is also written here. Failures
    /// are logged and the run continues.
    pub persist_path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            policy: CheckpointPolicy::BeforeEachEvent,
            capacity: 1,
            persist_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// On-disk cache directory. In-memory when `None`.
    pub path: Option<PathBuf>,
    pub digest: DigestOptions,
    /// Modules whose events are memoized by the main loop.
    pub cached_modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Entries kept in the completed-event log.
    pub completed_capacity: usize,
    /// Log and skip events whose type no handler accepts instead of failing.
    pub skip_undefined_events: bool,
    /// Roll the state back to the latest checkpoint when an event fails.
    pub restore_on_error: bool,
    /// Seed of the simulation RNG.
    pub seed: u64,
    pub checkpoint: CheckpointConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            completed_capacity: DEFAULT_COMPLETED_CAPACITY,
            skip_undefined_events: false,
            restore_on_error: true,
            seed: 42,
            checkpoint: CheckpointConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_completed_capacity(mut self, capacity: usize) -> Self {
        self.completed_capacity = capacity;
        self
    }

    pub fn with_skip_undefined_events(mut self, skip: bool) -> Self {
        self.skip_undefined_events = skip;
        self
    }

    pub fn with_restore_on_error(mut self, restore: bool) -> Self {
        self.restore_on_error = restore;
        self
    }

    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint.policy = policy;
        self
    }

    pub fn with_checkpoint_capacity(mut self, capacity: usize) -> Self {
        self.checkpoint.capacity = capacity;
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint.persist_path = Some(path.into());
        self
    }

    /// Enable the cache, in memory unless [`with_cache_path`](Self::with_cache_path)
    /// is also given.
    pub fn with_cache(mut self) -> Self {
        self.cache.enabled = true;
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache.enabled = true;
        self.cache.path = Some(path.into());
        self
    }

    pub fn with_digest_options(mut self, options: DigestOptions) -> Self {
        self.cache.digest = options;
        self
    }

    /// Memoize the events of `module` in the main loop. Enables the cache.
    pub fn with_cached_module(mut self, module: impl Into<String>) -> Self {
        self.cache.enabled = true;
        self.cache.cached_modules.push(module.into());
        self
    }
}
