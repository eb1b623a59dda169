//! Key/value storage for persisted ignore rules
//!
//! Provides trait-based string-set storage that embedders can back with
//! whatever durable store their platform offers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Error type for key/value store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse store: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for string-set key/value storage
///
/// Writes must be durable and visible to later reads before `put_string_set`
/// returns. Each put replaces the whole stored set.
pub trait KeyValueStore: Send + Sync {
    /// Read the set stored under `key` (empty if absent)
    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Replace the set stored under `key`
    fn put_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StoreError>;

    /// List all keys holding a non-empty set
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// File-based Store
// ============================================================================

/// Persistent file data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFileData {
    version: u32,
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl StoreFileData {
    fn new() -> Self {
        Self {
            version: 1,
            sets: BTreeMap::new(),
        }
    }
}

/// File-based key/value store
///
/// Stores every set in one JSON document at a configurable location.
/// Default: `~/.config/<app>/ignores.json`
pub struct FileKeyValueStore {
    path: PathBuf,
    data: RwLock<StoreFileData>,
}

impl FileKeyValueStore {
    /// Create a new file-based store at the specified path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader)?
        } else {
            StoreFileData::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Create a store in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, StoreError> {
        Self::new(default_store_path(app_name))
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write data to file and sync it
    fn save(&self, data: &StoreFileData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, data)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.sets.get(key).cloned().unwrap_or_default())
    }

    fn put_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);

        // Only commit in memory once the file write succeeded
        let mut next = data.clone();
        if values.is_empty() {
            next.sets.remove(key);
        } else {
            next.sets.insert(key.to_string(), values.clone());
        }
        self.save(&next)?;
        *data = next;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.sets.keys().cloned().collect())
    }
}

impl std::fmt::Debug for FileKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyValueStore")
            .field("path", &self.path)
            .finish()
    }
}

/// Default store location for an application
pub fn default_store_path(app_name: &str) -> PathBuf {
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
    config_dir.join(app_name).join("ignores.json")
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory key/value store for testing or session-only rules
pub struct MemoryKeyValueStore {
    data: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl MemoryKeyValueStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get the number of non-empty keys
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    fn put_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if values.is_empty() {
            data.remove(key);
        } else {
            data.insert(key.to_string(), values.clone());
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.keys().cloned().collect())
    }
}

impl std::fmt::Debug for MemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyValueStore")
            .field("count", &self.len())
            .finish()
    }
}

// ============================================================================
// Read-Only Store
// ============================================================================

/// Read-only wrapper for any key/value store
///
/// Useful where ignore rules are provisioned ahead of time and must not
/// change at runtime. Every write fails with [`StoreError::ReadOnly`].
pub struct ReadOnlyKeyValueStore<S: KeyValueStore> {
    inner: S,
}

impl<S: KeyValueStore> ReadOnlyKeyValueStore<S> {
    /// Create a read-only wrapper
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: KeyValueStore> KeyValueStore for ReadOnlyKeyValueStore<S> {
    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        self.inner.get_string_set(key)
    }

    fn put_string_set(&self, _key: &str, _values: &BTreeSet<String>) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys()
    }
}

impl<S: KeyValueStore + std::fmt::Debug> std::fmt::Debug for ReadOnlyKeyValueStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyKeyValueStore")
            .field("inner", &self.inner)
            .finish()
    }
}
