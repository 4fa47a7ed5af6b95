//! Object I/O collaborator.
//!
//! The engine never reads or writes dataset files itself. It calls out to an
//! [`ObjectIo`] implementation chosen by file extension; the loader places
//! the result in the object store under the declared name and the engine
//! flips the `loaded` / `saved` flag of the corresponding table row.

use indexmap::IndexMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("no loader/saver registered for extension '{0}'")]
    UnsupportedExtension(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("failed to encode object '{object}': {message}")]
    Encode { object: String, message: String },
}

impl IoError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        IoError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Loads and saves objects of one file format.
pub trait ObjectIo: Send + Sync {
    fn load(&self, object: &str, path: &Path) -> Result<Value, IoError>;
    fn save(&self, object: &str, value: &Value, path: &Path) -> Result<(), IoError>;
}

fn create(path: &Path) -> Result<BufWriter<File>, IoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| IoError::io(parent, e))?;
    }
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| IoError::io(path, e))
}

fn open(path: &Path) -> Result<BufReader<File>, IoError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| IoError::io(path, e))
}

/// JSON files, through [`Value::to_json`] / [`Value::from_json`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonIo;

impl ObjectIo for JsonIo {
    fn load(&self, _object: &str, path: &Path) -> Result<Value, IoError> {
        let json: serde_json::Value =
            serde_json::from_reader(open(path)?).map_err(|e| IoError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Value::from_json(&json))
    }

    fn save(&self, object: &str, value: &Value, path: &Path) -> Result<(), IoError> {
        serde_json::to_writer_pretty(create(path)?, &value.to_json()).map_err(|e| IoError::Encode {
            object: object.to_string(),
            message: e.to_string(),
        })
    }
}

/// Lossless binary files (bincode encoding of [`Value`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeIo;

impl ObjectIo for BincodeIo {
    fn load(&self, _object: &str, path: &Path) -> Result<Value, IoError> {
        bincode::deserialize_from(open(path)?).map_err(|e| IoError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn save(&self, object: &str, value: &Value, path: &Path) -> Result<(), IoError> {
        bincode::serialize_into(create(path)?, value).map_err(|e| IoError::Encode {
            object: object.to_string(),
            message: e.to_string(),
        })
    }
}

/// Loaders/savers keyed by lowercase file extension.
#[derive(Clone)]
pub struct IoRegistry {
    by_extension: IndexMap<String, Arc<dyn ObjectIo>>,
}

impl IoRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        IoRegistry {
            by_extension: IndexMap::new(),
        }
    }

    /// `.json` through [`JsonIo`] and `.bin` through [`BincodeIo`].
    pub fn new() -> Self {
        let mut reg = IoRegistry::empty();
        reg.register("json", JsonIo);
        reg.register("bin", BincodeIo);
        reg
    }

    pub fn register(&mut self, extension: &str, io: impl ObjectIo + 'static) {
        self.by_extension
            .insert(extension.trim_start_matches('.').to_lowercase(), Arc::new(io));
    }

    fn handler(&self, path: &Path) -> Result<&Arc<dyn ObjectIo>, IoError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.by_extension
            .get(&ext)
            .ok_or(IoError::UnsupportedExtension(ext))
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.handler(path).is_ok()
    }

    pub fn load(&self, object: &str, path: &Path) -> Result<Value, IoError> {
        self.handler(path)?.load(object, path)
    }

    pub fn save(&self, object: &str, value: &Value, path: &Path) -> Result<(), IoError> {
        self.handler(path)?.save(object, value, path)
    }
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoRegistry")
            .field("extensions", &self.by_extension.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::from([
            ("cells", Value::Series(vec![0.0, 1.5, 3.0])),
            ("name", Value::from("landscape")),
            ("raw", Value::Bytes(vec![1, 2, 3])),
        ])
    }

    #[test]
    fn test_json_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/map.json");
        let io = IoRegistry::new();
        io.save("map", &sample(), &path).unwrap();
        assert_eq!(io.load("map", &path).unwrap(), sample());
    }

    #[test]
    fn test_bincode_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.BIN");
        let io = IoRegistry::new();
        io.save("map", &sample(), &path).unwrap();
        assert_eq!(io.load("map", &path).unwrap(), sample());
    }

    #[test]
    fn test_unsupported_extension() {
        let io = IoRegistry::new();
        let err = io.load("map", Path::new("map.tif")).unwrap_err();
        assert!(matches!(err, IoError::UnsupportedExtension(ref e) if e == "tif"));
        assert!(!io.supports(Path::new("noext")));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let io = IoRegistry::new();
        let err = io.load("map", &dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, IoError::Io { .. }));
    }
}
