//! SQLite-backed key-value store.
//!
//! All values live in one table:
//!
//! ```sql
//! CREATE TABLE kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)
//! ```
//!
//! `rusqlite` is blocking, so every call runs on the blocking thread pool
//! with the connection behind a `std::sync::Mutex`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::KeyValueStore;
use crate::error::{PersistenceError, PersistenceResult};

const BACKEND: &str = "sqlite";

/// SQLite store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> PersistenceResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PersistenceResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    ///
    /// `on_err` builds the error for a poisoned lock or failed join; rusqlite
    /// errors are mapped the same way so reads and writes stay distinguishable.
    async fn run<T, F>(
        &self,
        key: &str,
        on_err: fn(&'static str, String, String) -> PersistenceError,
        op: F,
    ) -> PersistenceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let owned_key = key.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| on_err(BACKEND, owned_key.clone(), format!("lock poisoned: {e}")))?;
            op(&*guard).map_err(|e| on_err(BACKEND, owned_key, e.to_string()))
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(e) => Err(on_err(BACKEND, key.to_string(), format!("task failed: {e}"))),
        }
    }
}

fn read_err(backend: &'static str, key: String, message: String) -> PersistenceError {
    PersistenceError::read(backend, key, message)
}

fn write_err(backend: &'static str, key: String, message: String) -> PersistenceError {
    PersistenceError::write(backend, key, message)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let k = key.to_string();
        self.run(key, read_err, move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![k], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let (k, v) = (key.to_string(), value.to_string());
        self.run(key, write_err, move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![k, v],
            )
            .map(|_| ())
        })
        .await?;
        debug!(key = %key, "saved value to sqlite");
        Ok(())
    }

    async fn delete(&self, key: &str) -> PersistenceResult<()> {
        let k = key.to_string();
        self.run(key, write_err, move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![k])
                .map(|_| ())
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> PersistenceResult<Vec<String>> {
        let p = prefix.to_string();
        self.run(prefix, read_err, move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
            let rows = stmt.query_map(params![p], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }
}
