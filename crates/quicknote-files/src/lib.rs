//! File-based key-value store for QuickNote.
//!
//! Each key is one JSON file:
//!
//! ```text
//! .quicknote/
//!   .lock                                  # Lock file for writes
//!   kv/
//!     quicknote-notes-list.json
//!     quicknote-current-note.json
//!     quicknote-note-1767225600000-3f9a0c21b.json
//! ```
//!
//! Key characters outside `[A-Za-z0-9_-]` are percent-encoded in file names.

use fs2::FileExt;
use quicknote_core::{Error, KvStore};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

/// File-based store implementation.
#[derive(Debug, Clone)]
pub struct FilesStore {
    root: PathBuf,
}

impl FilesStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("kv"))
            .map_err(|e| Error::StorageFault(format!("Failed to create kv dir: {}", e)))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire an exclusive lock on the store.
    fn lock(&self) -> Result<FileLock, Error> {
        let lock_path = self.root.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| Error::StorageFault(format!("Failed to open lock file: {}", e)))?;

        file.lock_exclusive()
            .map_err(|e| Error::StorageFault(format!("Failed to acquire lock: {}", e)))?;

        Ok(FileLock { file })
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root
            .join("kv")
            .join(format!("{}.{}", encode_key(key), EXTENSION))
    }

    fn read_value(&self, key: &str) -> Result<Option<Value>, Error> {
        let path = self.value_path(key);

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StorageFault(format!("Failed to open {}: {}", key, e)))
            }
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| Error::StorageFault(format!("Failed to read {}: {}", key, e)))?;

        let value = serde_json::from_str(&contents)
            .map_err(|e| Error::StorageFault(format!("Failed to parse {}: {}", key, e)))?;

        Ok(Some(value))
    }

    /// Write a value atomically: temp file, fsync, rename.
    fn write_value(&self, key: &str, value: &Value) -> Result<(), Error> {
        let path = self.value_path(key);
        let temp_path = path.with_extension(format!("{}.tmp", EXTENSION));

        let contents = serde_json::to_string_pretty(value)
            .map_err(|e| Error::StorageFault(format!("Failed to serialize {}: {}", key, e)))?;

        let mut file = File::create(&temp_path)
            .map_err(|e| Error::StorageFault(format!("Failed to create temp file: {}", e)))?;

        file.write_all(contents.as_bytes())
            .map_err(|e| Error::StorageFault(format!("Failed to write temp file: {}", e)))?;

        file.sync_all()
            .map_err(|e| Error::StorageFault(format!("Failed to sync temp file: {}", e)))?;

        fs::rename(&temp_path, &path)
            .map_err(|e| Error::StorageFault(format!("Failed to rename temp file: {}", e)))?;

        Ok(())
    }

    fn remove_value(&self, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageFault(format!("Failed to delete {}: {}", key, e))),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>, Error> {
        let kv_dir = self.root.join("kv");
        let mut keys = Vec::new();

        let entries = fs::read_dir(&kv_dir)
            .map_err(|e| Error::StorageFault(format!("Failed to read kv dir: {}", e)))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| Error::StorageFault(format!("Failed to read dir entry: {}", e)))?;
            let path = entry.path();

            // Leftover temp files end in ".tmp" and are skipped here.
            if path.extension().map(|e| e == EXTENSION).unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    match decode_key(stem) {
                        Some(key) => keys.push(key),
                        None => log::warn!("skipping undecodable key file {}", path.display()),
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// RAII guard for file locking.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait::async_trait(?Send)]
impl KvStore for FilesStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        self.read_value(key)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        let _lock = self.lock()?;
        self.write_value(key, &value)
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        let _lock = self.lock()?;
        self.remove_value(key)
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        self.list_keys()
    }
}
