//! SQLite implementation of the QuickNote key-value store.

use quicknote_core::{get_pending_migrations, now, Error, KvStore, SCHEMA_VERSION};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed store implementation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn fault(e: rusqlite::Error) -> Error {
    Error::StorageFault(e.to_string())
}

impl SqliteStore {
    /// Open a database at the given path and run any pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(fault)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database and run migrations.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(fault)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, Error> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| Error::StorageFault("connection lock poisoned".into()))
    }

    /// Run any pending schema migrations.
    fn run_migrations(&self) -> Result<(), Error> {
        let conn = self.conn()?;

        // Ensure _quicknote_meta table exists
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _quicknote_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(fault)?;

        let current_version: i64 = conn
            .query_row(
                "SELECT value FROM _quicknote_meta WHERE key = 'schema_version'",
                [],
                |row| {
                    let val: String = row.get(0)?;
                    Ok(val.parse().unwrap_or(0))
                },
            )
            .optional()
            .map_err(fault)?
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        for migration in get_pending_migrations(current_version) {
            log::debug!("applying migration {} ({})", migration.version, migration.name);
            for statement in migration.statements {
                if statement.contains("_quicknote_meta") {
                    continue;
                }
                conn.execute(statement, []).map_err(|e| {
                    Error::StorageFault(format!("Migration {} failed: {}", migration.name, e))
                })?;
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO _quicknote_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(fault)?;

        Ok(())
    }
}

#[async_trait::async_trait(?Send)]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let conn = self.conn()?;

        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(fault)?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        let conn = self.conn()?;
        let raw = serde_json::to_string(&value)?;

        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, now()],
        )
        .map_err(fault)?;

        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(fault)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv ORDER BY key")
            .map_err(fault)?;

        let keys = stmt
            .query_map([], |row| row.get(0))
            .map_err(fault)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(fault)?;

        Ok(keys)
    }
}
