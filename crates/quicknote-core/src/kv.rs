use crate::Error;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Persisted key layout.
pub mod keys {
    /// The Notes List (JSON array of summaries).
    pub const NOTES_LIST: &str = "quicknote-notes-list";
    /// Prefix for one full note per key.
    pub const NOTE_PREFIX: &str = "quicknote-note-";
    /// The current selection (string id or null).
    pub const CURRENT_NOTE: &str = "quicknote-current-note";
    /// Content blob left behind by single-note installs. Read-only.
    pub const LEGACY_CONTENT: &str = "quicknote-content";

    /// Key under which the note with `id` is stored.
    pub fn note_key(id: &str) -> String {
        format!("{}{}", NOTE_PREFIX, id)
    }

    /// Inverse of [`note_key`].
    pub fn note_id_from_key(key: &str) -> Option<&str> {
        key.strip_prefix(NOTE_PREFIX)
    }
}

/// Durable key-value store abstraction shared by every backend.
///
/// Uses `async_trait` with `?Send` bound: all access happens on one
/// cooperative execution context, and backends may hold `!Send` handles.
#[async_trait::async_trait(?Send)]
pub trait KvStore {
    /// Read a value. `Ok(None)` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, Error>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<(), Error>;

    /// Remove a key. Removing an absent key succeeds.
    async fn del(&self, key: &str) -> Result<(), Error>;

    /// List every key currently stored.
    async fn keys(&self) -> Result<Vec<String>, Error>;
}

#[derive(Debug, Default)]
struct Faults {
    reads: bool,
    writes: bool,
    keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    data: BTreeMap<String, Value>,
    faults: Faults,
}

/// In-memory store. Clones share the same data, so several repositories can
/// act as separate views of one origin.
///
/// Faults can be injected to exercise degraded paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::StorageFault("memory store lock poisoned".into()))
    }

    /// Make every read fail.
    pub fn set_fail_reads(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.faults.reads = fail;
        }
    }

    /// Make every write and delete fail.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.faults.writes = fail;
        }
    }

    /// Make every operation on `key` fail.
    pub fn fail_key(&self, key: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.faults.keys.insert(key.to_string());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.faults = Faults::default();
        }
    }
}

impl MemoryInner {
    fn check(&self, key: &str, write: bool) -> Result<(), Error> {
        let blocked = if write {
            self.faults.writes
        } else {
            self.faults.reads
        };
        if blocked || self.faults.keys.contains(key) {
            let op = if write { "write" } else { "read" };
            return Err(Error::StorageFault(format!("injected {} failure on {}", op, key)));
        }
        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let inner = self.lock()?;
        inner.check(key, false)?;
        Ok(inner.data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.check(key, true)?;
        inner.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        let mut inner = self.lock()?;
        inner.check(key, true)?;
        inner.data.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        let inner = self.lock()?;
        if inner.faults.reads {
            return Err(Error::StorageFault("injected read failure on keys".into()));
        }
        Ok(inner.data.keys().cloned().collect())
    }
}
