//! Typed key/value persistence backing the [`crate::storage::Storage`]
//! façade's non-event keys (counters, retry metadata).

use crate::error::StorageError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// A typed key/value store. All operations treat a value stored under a
/// different type as absent.
pub trait KeyValueStore: Send + Sync {
    fn write_string(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn read_string(&self, key: &str, default: &str) -> String;
    fn write_i64(&self, key: &str, value: i64) -> Result<(), StorageError>;
    fn read_i64(&self, key: &str, default: i64) -> i64;
    fn write_i32(&self, key: &str, value: i32) -> Result<(), StorageError>;
    fn read_i32(&self, key: &str, default: i32) -> i32;
    fn write_bool(&self, key: &str, value: bool) -> Result<(), StorageError>;
    fn read_bool(&self, key: &str, default: bool) -> bool;
    fn remove(&self, key: &str);
    fn clear(&self);
}

#[derive(Clone, Debug, PartialEq)]
enum Value {
    String(String),
    I64(i64),
    I32(i32),
    Bool(bool),
}

/// In-process key/value store, guarded by a single mutex.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn write_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    fn read_string(&self, key: &str, default: &str) -> String {
        match self.entries.lock().get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    fn write_i64(&self, key: &str, value: i64) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), Value::I64(value));
        Ok(())
    }

    fn read_i64(&self, key: &str, default: i64) -> i64 {
        match self.entries.lock().get(key) {
            Some(Value::I64(v)) => *v,
            _ => default,
        }
    }

    fn write_i32(&self, key: &str, value: i32) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), Value::I32(value));
        Ok(())
    }

    fn read_i32(&self, key: &str, default: i32) -> i32 {
        match self.entries.lock().get(key) {
            Some(Value::I32(v)) => *v,
            _ => default,
        }
    }

    fn write_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), Value::Bool(value));
        Ok(())
    }

    fn read_bool(&self, key: &str, default: bool) -> bool {
        match self.entries.lock().get(key) {
            Some(Value::Bool(v)) => *v,
            _ => default,
        }
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// File-backed key/value store: a single properties file of `key=value`
/// lines, with a type tag prefix so `read_*` can detect a type mismatch and
/// fall back to the default per the Storage invariant.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Value>>,
}

impl FileKeyValueStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            Self::load(&path)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn load(path: &PathBuf) -> Result<HashMap<String, Value>, StorageError> {
        let raw = fs::read_to_string(path)?;
        let mut map = HashMap::new();
        for line in raw.lines() {
            let Some((key, tagged)) = line.split_once('=') else {
                continue;
            };
            let Some((tag, value)) = tagged.split_once(':') else {
                continue;
            };
            let parsed = match tag {
                "s" => Some(Value::String(value.to_string())),
                "i64" => value.parse().ok().map(Value::I64),
                "i32" => value.parse().ok().map(Value::I32),
                "b" => value.parse().ok().map(Value::Bool),
                _ => None,
            };
            if let Some(v) = parsed {
                map.insert(key.to_string(), v);
            }
        }
        Ok(map)
    }

    fn persist(&self) -> Result<(), StorageError> {
        let entries = self.entries.lock();
        let mut out = String::new();
        for (key, value) in entries.iter() {
            match value {
                Value::String(s) => out.push_str(&format!("{key}=s:{s}\n")),
                Value::I64(v) => out.push_str(&format!("{key}=i64:{v}\n")),
                Value::I32(v) => out.push_str(&format!("{key}=i32:{v}\n")),
                Value::Bool(v) => out.push_str(&format!("{key}=b:{v}\n")),
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, out)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn write_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .insert(key.to_string(), Value::String(value.to_string()));
        self.persist()
    }

    fn read_string(&self, key: &str, default: &str) -> String {
        match self.entries.lock().get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    fn write_i64(&self, key: &str, value: i64) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), Value::I64(value));
        self.persist()
    }

    fn read_i64(&self, key: &str, default: i64) -> i64 {
        match self.entries.lock().get(key) {
            Some(Value::I64(v)) => *v,
            _ => default,
        }
    }

    fn write_i32(&self, key: &str, value: i32) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), Value::I32(value));
        self.persist()
    }

    fn read_i32(&self, key: &str, default: i32) -> i32 {
        match self.entries.lock().get(key) {
            Some(Value::I32(v)) => *v,
            _ => default,
        }
    }

    fn write_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), Value::Bool(value));
        self.persist()
    }

    fn read_bool(&self, key: &str, default: bool) -> bool {
        match self.entries.lock().get(key) {
            Some(Value::Bool(v)) => *v,
            _ => default,
        }
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
        let _ = self.persist();
    }

    fn clear(&self) {
        self.entries.lock().clear();
        let _ = self.persist();
    }
}
