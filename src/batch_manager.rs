//! Durable open/closed batch management, file-backed and in-memory.

use crate::config::{Config, PlatformType};
use crate::error::StorageError;
use crate::kv_store::{FileKeyValueStore, KeyValueStore};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

const BATCH_PREFIX: &str = "{\"batch\":[";
pub(crate) const SENT_AT_PLACEHOLDER: &str = "1970-01-01T00:00:00.000Z";

fn closing_suffix() -> String {
    format!("],\"sentAt\":\"{SENT_AT_PLACEHOLDER}\"}}")
}

/// Identifies a closed batch. Wraps the monotonic counter value the batch
/// was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maintains one open batch per write-key and enumerates closed batches.
///
/// Implementations serialize all mutating operations behind a single
/// internal mutex; reads are lock-free snapshots that may observe either
/// side of a concurrent write.
pub trait BatchManager: Send + Sync {
    fn store_event(&self, payload: &str) -> Result<(), StorageError>;
    fn read(&self) -> Vec<BatchId>;
    fn read_content(&self, id: BatchId) -> Option<Bytes>;
    fn remove(&self, id: BatchId) -> bool;
    fn rollover(&self);
    fn close_and_reset(&self);
    fn delete(&self);
}

struct OpenBatch {
    index: u64,
    buffer: Vec<u8>,
}

impl OpenBatch {
    fn new(index: u64) -> Self {
        Self {
            index,
            buffer: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn append(&mut self, payload: &str) {
        if self.is_empty() {
            self.buffer.extend_from_slice(BATCH_PREFIX.as_bytes());
        } else {
            self.buffer.push(b',');
        }
        self.buffer.extend_from_slice(payload.as_bytes());
    }

    fn finalize(self) -> Bytes {
        let mut buffer = self.buffer;
        buffer.extend_from_slice(closing_suffix().as_bytes());
        Bytes::from(buffer)
    }
}

/// In-memory backend: batches live in a mutex-guarded map, exactly as one
/// open-batch buffer plus a closed-batch table.
pub struct InMemoryBatchManager {
    max_batch_size: usize,
    platform_type: PlatformType,
    counter: AtomicU64,
    open: Mutex<Option<OpenBatch>>,
    closed: Mutex<HashMap<u64, Bytes>>,
    insertion_order: Mutex<Vec<u64>>,
}

impl InMemoryBatchManager {
    pub fn new(config: &Config) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            platform_type: config.platform_type,
            counter: AtomicU64::new(0),
            open: Mutex::new(None),
            closed: Mutex::new(HashMap::new()),
            insertion_order: Mutex::new(Vec::new()),
        }
    }

    /// Finalizes the open batch (if any) into the closed table and advances
    /// the index counter. The counter only moves here, at rollover time, not
    /// at batch-creation time.
    fn finalize_open_locked(&self, open_guard: &mut Option<OpenBatch>) {
        if let Some(open) = open_guard.take() {
            let index = open.index;
            self.counter.fetch_add(1, Ordering::SeqCst);
            let bytes = open.finalize();
            self.closed.lock().insert(index, bytes);
            self.insertion_order.lock().push(index);
            tracing::debug!(batch_id = index, "batch finalized");
        }
    }
}

impl BatchManager for InMemoryBatchManager {
    fn store_event(&self, payload: &str) -> Result<(), StorageError> {
        let mut open_guard = self.open.lock();

        if open_guard.is_none() {
            let index = self.counter.load(Ordering::SeqCst);
            *open_guard = Some(OpenBatch::new(index));
            tracing::debug!(batch_id = index, "opened new batch");
        }

        if open_guard.as_ref().map(|b| b.buffer.len()).unwrap_or(0) > self.max_batch_size {
            self.finalize_open_locked(&mut open_guard);
            let index = self.counter.load(Ordering::SeqCst);
            *open_guard = Some(OpenBatch::new(index));
            tracing::debug!(batch_id = index, "opened new batch after size rollover");
        }

        open_guard.as_mut().expect("open batch just ensured").append(payload);
        Ok(())
    }

    fn read(&self) -> Vec<BatchId> {
        match self.platform_type {
            PlatformType::Server => {
                let mut ids: Vec<u64> = self.closed.lock().keys().copied().collect();
                ids.sort_unstable();
                ids.into_iter().map(BatchId).collect()
            }
            PlatformType::Mobile => {
                let closed = self.closed.lock();
                self.insertion_order
                    .lock()
                    .iter()
                    .filter(|id| closed.contains_key(id))
                    .map(|id| BatchId(*id))
                    .collect()
            }
        }
    }

    fn read_content(&self, id: BatchId) -> Option<Bytes> {
        self.closed.lock().get(&id.0).cloned()
    }

    fn remove(&self, id: BatchId) -> bool {
        let removed = self.closed.lock().remove(&id.0).is_some();
        if removed {
            self.insertion_order.lock().retain(|i| *i != id.0);
        }
        removed
    }

    fn rollover(&self) {
        tracing::debug!("rolling over open batch");
        let mut open_guard = self.open.lock();
        self.finalize_open_locked(&mut open_guard);
    }

    fn close_and_reset(&self) {
        tracing::debug!("closing open batch without finalizing");
        *self.open.lock() = None;
    }

    fn delete(&self) {
        *self.open.lock() = None;
        self.closed.lock().clear();
        self.insertion_order.lock().clear();
    }
}

/// File-backed backend: closed batches are files named after their index
/// under `<base_dir>/<write_key>/`; the open batch is the same name with a
/// `.tmp` suffix. The index counter is persisted in a sibling properties
/// file via [`FileKeyValueStore`].
pub struct FileBatchManager {
    dir: PathBuf,
    max_batch_size: usize,
    platform_type: PlatformType,
    counter_key: String,
    counter_store: FileKeyValueStore,
    write_lock: Mutex<()>,
}

impl FileBatchManager {
    pub fn new(config: &Config) -> Result<Self, StorageError> {
        let dir = config.base_dir.join(&config.write_key);
        fs::create_dir_all(&dir)?;
        let counter_path = config.base_dir.join(format!("{}.properties", config.write_key));
        let counter_store = FileKeyValueStore::open(counter_path)?;
        Ok(Self {
            dir,
            max_batch_size: config.max_batch_size,
            platform_type: config.platform_type,
            counter_key: format!("rudderstack.event.batch.index.{}", config.write_key),
            counter_store,
            write_lock: Mutex::new(()),
        })
    }

    /// Reads the counter's current value without advancing it. The counter
    /// only advances when a batch is finalized (see `finalize`), not when a
    /// new open batch is created.
    fn peek_index(&self) -> u64 {
        self.counter_store.read_i64(&self.counter_key, 0) as u64
    }

    /// Advances the persisted counter past `finalized_index`, the index of
    /// the batch that was just finalized.
    fn advance_counter(&self, finalized_index: u64) {
        let _ = self
            .counter_store
            .write_i64(&self.counter_key, finalized_index as i64 + 1);
    }

    fn tmp_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index}.tmp"))
    }

    fn closed_path(&self, index: u64) -> PathBuf {
        self.dir.join(index.to_string())
    }

    fn open_tmp_index(&self) -> Option<u64> {
        let entries = fs::read_dir(&self.dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_suffix(".tmp") {
                if let Ok(idx) = stripped.parse::<u64>() {
                    return Some(idx);
                }
            }
        }
        None
    }
}

impl BatchManager for FileBatchManager {
    fn store_event(&self, payload: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();

        let index = match self.open_tmp_index() {
            Some(idx) => idx,
            None => {
                let idx = self.peek_index();
                fs::write(self.tmp_path(idx), "")?;
                tracing::debug!(batch_id = idx, "opened new batch");
                idx
            }
        };

        let tmp_path = self.tmp_path(index);
        let current_len = fs::metadata(&tmp_path).map(|m| m.len() as usize).unwrap_or(0);

        let index = if current_len > self.max_batch_size {
            self.finalize(index)?;
            let idx = self.peek_index();
            fs::write(self.tmp_path(idx), "")?;
            tracing::debug!(batch_id = idx, "opened new batch after size rollover");
            idx
        } else {
            index
        };

        let tmp_path = self.tmp_path(index);
        let existing = fs::read(&tmp_path)?;
        let mut buffer = existing;
        if buffer.is_empty() {
            buffer.extend_from_slice(BATCH_PREFIX.as_bytes());
        } else {
            buffer.push(b',');
        }
        buffer.extend_from_slice(payload.as_bytes());
        fs::write(&tmp_path, buffer)?;
        Ok(())
    }

    fn read(&self) -> Vec<BatchId> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names: Vec<(u64, std::fs::DirEntry)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy().to_string();
            if name.ends_with(".tmp") {
                continue;
            }
            if let Ok(idx) = name.parse::<u64>() {
                names.push((idx, entry));
            }
        }

        match self.platform_type {
            PlatformType::Server => {
                names.sort_by_key(|(idx, _)| *idx);
            }
            PlatformType::Mobile => {}
        }

        names.into_iter().map(|(idx, _)| BatchId(idx)).collect()
    }

    fn read_content(&self, id: BatchId) -> Option<Bytes> {
        fs::read(self.closed_path(id.0)).ok().map(Bytes::from)
    }

    fn remove(&self, id: BatchId) -> bool {
        fs::remove_file(self.closed_path(id.0)).is_ok()
    }

    fn rollover(&self) {
        tracing::debug!("rolling over open batch");
        let _guard = self.write_lock.lock();
        if let Some(idx) = self.open_tmp_index() {
            let _ = self.finalize(idx);
        }
    }

    fn close_and_reset(&self) {
        tracing::debug!("closing open batch without finalizing");
        let _guard = self.write_lock.lock();
        if let Some(idx) = self.open_tmp_index() {
            let _ = fs::remove_file(self.tmp_path(idx));
        }
    }

    fn delete(&self) {
        let _guard = self.write_lock.lock();
        let _ = fs::remove_dir_all(&self.dir);
        let _ = fs::create_dir_all(&self.dir);
    }
}

impl FileBatchManager {
    fn finalize(&self, index: u64) -> Result<(), StorageError> {
        // Advance the persisted counter past `index` before writing the
        // closed file: if the process dies between these two steps, the
        // counter must never point at an index whose data is still being
        // written, or a restart could open a new batch that overwrites it.
        self.advance_counter(index);
        let tmp_path = self.tmp_path(index);
        let mut buffer = fs::read(&tmp_path)?;
        buffer.extend_from_slice(closing_suffix().as_bytes());
        fs::write(self.closed_path(index), buffer)?;
        fs::remove_file(tmp_path)?;
        tracing::debug!(batch_id = index, "batch finalized");
        Ok(())
    }
}
