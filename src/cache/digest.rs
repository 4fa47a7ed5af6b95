//! Reproducible digests of values and states.
//!
//! A digest is computed in two steps. The input is first normalized into a
//! canonical [`Value`]: map keys are sorted, keys listed in
//! [`DigestOptions::strip_keys`] are removed, timestamps are dropped and
//! file-backed objects are replaced by their base name plus a hash of their
//! leading bytes. The canonical value is then encoded into a tagged byte
//! stream and hashed with the selected algorithm.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::eventlog::hash_bytes;
use crate::state::SimState;
use crate::value::Value;

use super::CacheError;

/// Default number of leading bytes of a file that feed its content hash.
pub const DEFAULT_FILE_BYTES: usize = 64 * 1024;

/// Map keys stripped from every digest by default.
pub const DEFAULT_STRIP_KEYS: &[&str] = &["rng_state", "started_at", "timestamp", "wall_clock"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// 64-bit FNV-1a. Fast, not collision resistant.
    #[default]
    Fnv1a64,
    /// 256-bit BLAKE3.
    Blake3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestOptions {
    pub algorithm: DigestAlgorithm,
    /// Leading bytes of a file hashed for file-backed objects. `None` hashes
    /// the whole file.
    pub file_bytes: Option<usize>,
    /// Map keys removed before hashing, at any depth of a value. The names
    /// of a state's objects, parameters and modules are never stripped.
    pub strip_keys: Vec<String>,
}

impl Default for DigestOptions {
    fn default() -> Self {
        DigestOptions {
            algorithm: DigestAlgorithm::default(),
            file_bytes: Some(DEFAULT_FILE_BYTES),
            strip_keys: DEFAULT_STRIP_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl DigestOptions {
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_file_bytes(mut self, bytes: Option<usize>) -> Self {
        self.file_bytes = bytes;
        self
    }

    pub fn strip(mut self, key: impl Into<String>) -> Self {
        self.strip_keys.push(key.into());
        self
    }
}

/// A fixed-width lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an existing hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Digest(hex.into())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Normalization ─────────────────────────────────────────────────────

/// Values that can be reduced to a canonical, reproducible [`Value`].
pub trait Digestible {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError>;
}

/// Canonical form of `value` under `options`.
pub fn normalize_value(value: &Value, options: &DigestOptions) -> Result<Value, CacheError> {
    Ok(match value {
        Value::Timestamp(_) => Value::Null,
        Value::File(path) => Value::Text(file_fingerprint(path, options)?),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| normalize_value(v, options))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(map) => {
            let mut entries: Vec<(&String, &Value)> = map
                .iter()
                .filter(|(k, _)| !options.strip_keys.iter().any(|s| s == *k))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k.clone(), normalize_value(v, options)?)))
                    .collect::<Result<_, CacheError>>()?,
            )
        }
        other => other.clone(),
    })
}

/// `<base name>:<hash of leading bytes>`; the directory never matters.
fn file_fingerprint(path: &Path, options: &DigestOptions) -> Result<String, CacheError> {
    let failure = |e: std::io::Error| CacheError::DigestFailure(format!("{}: {}", path.display(), e));
    let file = File::open(path).map_err(failure)?;
    let mut bytes = Vec::new();
    match options.file_bytes {
        Some(limit) => file.take(limit as u64).read_to_end(&mut bytes),
        None => { file }.read_to_end(&mut bytes),
    }
    .map_err(failure)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(format!("{}:{}", name, hash_with(options.algorithm, &bytes)))
}

impl Digestible for Value {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        normalize_value(self, options)
    }
}

impl Digestible for str {
    fn normalize(&self, _: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::Text(self.to_string()))
    }
}

impl Digestible for String {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        self.as_str().normalize(options)
    }
}

impl Digestible for f64 {
    fn normalize(&self, _: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::Float(*self))
    }
}

impl Digestible for i64 {
    fn normalize(&self, _: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::Int(*self))
    }
}

impl Digestible for bool {
    fn normalize(&self, _: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::Bool(*self))
    }
}

impl<T: Digestible> Digestible for [T] {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::List(
            self.iter()
                .map(|v| v.normalize(options))
                .collect::<Result<_, _>>()?,
        ))
    }
}

impl<T: Digestible> Digestible for Vec<T> {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        self.as_slice().normalize(options)
    }
}

impl<T: Digestible + ?Sized> Digestible for &T {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        (**self).normalize(options)
    }
}

impl<A: Digestible, B: Digestible> Digestible for (A, B) {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::List(vec![
            self.0.normalize(options)?,
            self.1.normalize(options)?,
        ]))
    }
}

impl<A: Digestible, B: Digestible, C: Digestible> Digestible for (A, B, C) {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        Ok(Value::List(vec![
            self.0.normalize(options)?,
            self.1.normalize(options)?,
            self.2.normalize(options)?,
        ]))
    }
}

/// Canonical form of a named table whose own keys are user names and are
/// never stripped. Values are normalized as usual.
fn normalize_table(
    table: &indexmap::IndexMap<String, Value>,
    options: &DigestOptions,
) -> Result<Value, CacheError> {
    let mut entries: Vec<(&String, &Value)> = table.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    Ok(Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| Ok((k.clone(), normalize_value(v, options)?)))
            .collect::<Result<_, CacheError>>()?,
    ))
}

fn normalize_nested(
    nested: &indexmap::IndexMap<String, indexmap::IndexMap<String, Value>>,
    options: &DigestOptions,
) -> Result<Value, CacheError> {
    let mut entries: Vec<_> = nested.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    Ok(Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| Ok((k.clone(), normalize_table(v, options)?)))
            .collect::<Result<_, CacheError>>()?,
    ))
}

/// The reproducible projection of a state: objects, parameters, per-module
/// state and the clock. RNG bookkeeping, the wall-clock start, paths, the
/// queue, usage tracking and the completed log are left out structurally.
/// Object, parameter and module names are kept whatever `strip_keys` says;
/// stripping applies inside their values.
impl Digestible for SimState {
    fn normalize(&self, options: &DigestOptions) -> Result<Value, CacheError> {
        let times = self.times();
        Ok(Value::from([
            ("modules", normalize_nested(self.module_states(), options)?),
            ("objects", normalize_table(self.objects(), options)?),
            ("params", normalize_nested(self.params(), options)?),
            (
                "times",
                Value::from([
                    ("current", Value::Float(times.current.as_secs())),
                    ("end", Value::Float(times.end.as_secs())),
                    ("start", Value::Float(times.start.as_secs())),
                    ("unit", Value::from(times.time_unit.as_str())),
                ]),
            ),
        ]))
    }
}

// ── Encoding and hashing ──────────────────────────────────────────────

fn encode(value: &Value, out: &mut Vec<u8>) {
    fn len(n: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(&(n as u64).to_le_bytes());
    }
    fn float(f: f64, out: &mut Vec<u8>) {
        // One bit pattern for zero and one for NaN.
        let canonical = if f == 0.0 {
            0.0
        } else if f.is_nan() {
            f64::NAN
        } else {
            f
        };
        out.extend_from_slice(&canonical.to_bits().to_le_bytes());
    }
    match value {
        Value::Null => out.push(0),
        Value::Bool(b) => out.extend_from_slice(&[1, *b as u8]),
        Value::Int(i) => {
            out.push(2);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(3);
            float(*f, out);
        }
        Value::Text(s) => {
            out.push(4);
            len(s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Series(s) => {
            out.push(5);
            len(s.len(), out);
            for f in s {
                float(*f, out);
            }
        }
        Value::List(items) => {
            out.push(6);
            len(items.len(), out);
            for v in items {
                encode(v, out);
            }
        }
        Value::Map(map) => {
            out.push(7);
            len(map.len(), out);
            for (k, v) in map {
                len(k.len(), out);
                out.extend_from_slice(k.as_bytes());
                encode(v, out);
            }
        }
        Value::Bytes(b) => {
            out.push(8);
            len(b.len(), out);
            out.extend_from_slice(b);
        }
        Value::Timestamp(t) => {
            out.push(9);
            out.extend_from_slice(&t.to_le_bytes());
        }
        Value::File(p) => {
            let s = p.to_string_lossy();
            out.push(10);
            len(s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn hash_with(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Fnv1a64 => format!("{:016x}", hash_bytes(bytes)),
        DigestAlgorithm::Blake3 => hex::encode(blake3::hash(bytes).as_bytes()),
    }
}

/// Digest of `value` under `options`.
pub fn digest<T: Digestible + ?Sized>(value: &T, options: &DigestOptions) -> Result<Digest, CacheError> {
    let normalized = value.normalize(options)?;
    let mut bytes = Vec::new();
    encode(&normalized, &mut bytes);
    Ok(Digest(hash_with(options.algorithm, &bytes)))
}
