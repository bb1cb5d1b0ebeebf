//! Façade over a [`BatchManager`] and a [`KeyValueStore`], matching the
//! uniform key/value + batch-file surface the uploader depends on.

use crate::batch_manager::{BatchId, BatchManager};
use crate::config::Config;
use crate::error::StorageError;
use crate::kv_store::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
use std::sync::Arc;

/// Library identity returned by [`Storage::get_library_version`].
pub const LIBRARY_NAME: &str = env!("CARGO_PKG_NAME");
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key under which `RetryHeadersProvider` persists the single `RetryMetadata`
/// record.
pub const RETRY_METADATA_KEY: &str = "RETRY_METADATA";

const DEFAULT_EVENT_JOIN_SEPARATOR: &str = ", ";

/// Uniform key/value + batch-file surface. Routes the special `EVENT`
/// pseudo-key to the [`BatchManager`]; every other key goes to the
/// [`KeyValueStore`].
pub struct Storage {
    batch_manager: Arc<dyn BatchManager>,
    kv: Arc<dyn KeyValueStore>,
    max_payload_size: usize,
}

impl Storage {
    pub fn new(batch_manager: Arc<dyn BatchManager>, kv: Arc<dyn KeyValueStore>, max_payload_size: usize) -> Self {
        Self {
            batch_manager,
            kv,
            max_payload_size,
        }
    }

    /// Build an in-memory-backed `Storage` from `config`.
    pub fn in_memory(config: &Config) -> Self {
        let batch_manager: Arc<dyn BatchManager> =
            Arc::new(crate::batch_manager::InMemoryBatchManager::new(config));
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        Self::new(batch_manager, kv, config.max_payload_size)
    }

    /// Build a file-backed `Storage` from `config`.
    pub fn file_backed(config: &Config) -> Result<Self, StorageError> {
        let batch_manager: Arc<dyn BatchManager> =
            Arc::new(crate::batch_manager::FileBatchManager::new(config)?);
        let kv_path = config.base_dir.join(format!("{}.kv.properties", config.write_key));
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(kv_path)?);
        Ok(Self::new(batch_manager, kv, config.max_payload_size))
    }

    /// `write(EVENT, payload)` — rejects oversize payloads at the boundary,
    /// otherwise delegates to `store_event`.
    pub fn write_event(&self, payload: &str) -> Result<(), StorageError> {
        if payload.len() >= self.max_payload_size {
            return Err(StorageError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_size,
            });
        }
        self.batch_manager.store_event(payload)
    }

    /// `read(EVENT, default)` — closed-batch identifiers joined by `", "`.
    /// This string is the protocol between `Storage` and the uploader.
    pub fn read_events(&self, default: &str) -> String {
        let ids = self.batch_manager.read();
        if ids.is_empty() {
            return default.to_string();
        }
        ids.iter()
            .map(|id| id.0.to_string())
            .collect::<Vec<_>>()
            .join(DEFAULT_EVENT_JOIN_SEPARATOR)
    }

    pub fn read_file_list(&self) -> Vec<BatchId> {
        self.batch_manager.read()
    }

    pub fn read_batch_content(&self, id: BatchId) -> Option<String> {
        self.batch_manager
            .read_content(id)
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    }

    pub fn rollover(&self) {
        self.batch_manager.rollover();
    }

    pub fn remove(&self, id: BatchId) -> bool {
        self.batch_manager.remove(id)
    }

    pub fn close(&self) {
        self.batch_manager.close_and_reset();
    }

    /// Clears every key and every batch. Destructive.
    pub fn delete(&self) {
        self.batch_manager.delete();
        self.kv.clear();
    }

    pub fn get_library_version(&self) -> (&'static str, &'static str) {
        (LIBRARY_NAME, LIBRARY_VERSION)
    }

    pub fn write_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.kv.write_string(key, value)
    }

    pub fn read_string(&self, key: &str, default: &str) -> String {
        self.kv.read_string(key, default)
    }

    pub fn write_i64(&self, key: &str, value: i64) -> Result<(), StorageError> {
        self.kv.write_i64(key, value)
    }

    pub fn read_i64(&self, key: &str, default: i64) -> i64 {
        self.kv.read_i64(key, default)
    }

    pub fn write_i32(&self, key: &str, value: i32) -> Result<(), StorageError> {
        self.kv.write_i32(key, value)
    }

    pub fn read_i32(&self, key: &str, default: i32) -> i32 {
        self.kv.read_i32(key, default)
    }

    pub fn write_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.kv.write_bool(key, value)
    }

    pub fn read_bool(&self, key: &str, default: bool) -> bool {
        self.kv.read_bool(key, default)
    }

    pub fn remove_key(&self, key: &str) {
        self.kv.remove(key);
    }
}
