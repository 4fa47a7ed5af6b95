//! Memoized execution: run a function once per distinct digest of its inputs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::value::Value;

use super::digest::{Digest, Digestible};
use super::store::{Cache, TAG_FUNCTION, TAG_GRANULARITY};

/// Scope a cached result is keyed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    /// One artifact per distinct input for the whole run.
    Run,
    /// Keyed per module, so two modules calling the same function with the
    /// same inputs do not share an entry.
    Module(String),
    /// Keyed by function name and inputs only.
    Function,
}

impl Granularity {
    fn label(&self) -> String {
        match self {
            Granularity::Run => "run".to_string(),
            Granularity::Module(m) => format!("module:{}", m),
            Granularity::Function => "function".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Executed,
    Recovered,
}

/// The artifact returned by [`Cache::run_cached`].
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub artifact: Value,
    /// `None` when the inputs could not be digested and caching was skipped.
    pub digest: Option<Digest>,
    pub source: CacheSource,
}

impl Cached {
    pub fn was_recovered(&self) -> bool {
        self.source == CacheSource::Recovered
    }
}

impl Cache {
    /// Return the artifact cached for `(function, args, granularity)`, or run
    /// `f`, store its artifact and return it.
    ///
    /// Digest, lookup and store failures are logged and fall back to plain
    /// execution. Errors from `f` are returned as-is and nothing is stored.
    pub fn run_cached<A, E, F>(
        &mut self,
        function: &str,
        args: &A,
        granularity: &Granularity,
        f: F,
    ) -> Result<Cached, E>
    where
        A: Digestible + ?Sized,
        F: FnOnce() -> Result<Value, E>,
    {
        let scope = granularity.label();
        let digest = match self.digest(&(function, scope.as_str(), args)) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(function, error = %e, "cache digest failed; executing without cache");
                None
            }
        };

        if let Some(d) = &digest {
            match self.lookup(d) {
                Ok(Some(entry)) => {
                    info!(function, digest = %d, "recovered from cache");
                    return Ok(Cached {
                        artifact: entry.artifact,
                        digest,
                        source: CacheSource::Recovered,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(function, error = %e, "cache lookup failed; executing"),
            }
        }

        let artifact = f()?;
        info!(function, "executed");

        if let Some(d) = &digest {
            let mut tags = IndexMap::new();
            tags.insert(TAG_FUNCTION.to_string(), function.to_string());
            tags.insert(TAG_GRANULARITY.to_string(), scope);
            if let Err(e) = self.store(d.clone(), artifact.clone(), tags) {
                warn!(function, error = %e, "cache store failed");
            }
        }

        Ok(Cached {
            artifact,
            digest,
            source: CacheSource::Executed,
        })
    }
}
