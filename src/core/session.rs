//! Session identity and the durable storage behind it.
//!
//! A session id survives reloads for as long as consent stays granted. It is
//! deleted on revocation so the next grant starts a new session.

use serde_json::Map;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Errors from durable storage.
#[derive(Debug)]
pub enum StorageError {
    IoError(String),
    ParseError(String),
    Poisoned,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(e) => write!(f, "Storage IO error: {e}"),
            StorageError::ParseError(e) => write!(f, "Storage parse error: {e}"),
            StorageError::Poisoned => write!(f, "Storage lock poisoned"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Durable string key/value storage.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Storage persisted as a JSON object in a single file.
#[derive(Debug)]
pub struct FileSessionStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStorage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, serde_json::Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| StorageError::IoError(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content).map_err(|e| StorageError::ParseError(e.to_string()))
    }

    fn write_map(&self, map: &Map<String, serde_json::Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::IoError(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(map)
            .map_err(|e| StorageError::ParseError(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| StorageError::IoError(e.to_string()))
    }
}

impl SessionStorage for FileSessionStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let map = self.read_map()?;
        Ok(map.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// Restores, creates and clears the persisted session id.
#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    key: String,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn SessionStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Reuse the stored id verbatim, or generate and persist a new one.
    ///
    /// If storage is unusable the id is still returned, it just will not
    /// survive a reload.
    pub fn restore_or_create(&self) -> String {
        match self.storage.get(&self.key) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => crate::dev_warn!("Could not read session id: {e}"),
        }

        let id = generate_session_id();
        if let Err(e) = self.storage.set(&self.key, &id) {
            crate::dev_warn!("Could not persist session id: {e}");
        }
        id
    }

    /// The stored id, if any, without creating one.
    pub fn current(&self) -> Option<String> {
        self.storage.get(&self.key).ok().flatten()
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            crate::dev_warn!("Could not remove session id: {e}");
        }
    }
}

/// A fresh random session identifier.
pub fn generate_session_id() -> String {
    format!("sess_{}", Uuid::new_v4().simple())
}
