//! Key-value persistence backends.
//!
//! Both the wallet registry and the ledger store persist through the
//! [`KeyValueStore`] trait. Values are JSON strings; keys are namespaced:
//!
//! | Key                                   | Value                          |
//! |---------------------------------------|--------------------------------|
//! | `secret:{family}`                     | mnemonic phrase + passphrase   |
//! | `wallets:{chain}`                     | ordered wallet records         |
//! | `ledger:{chain}:{network}:{address}`  | ordered ledger entries         |
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral sessions.
//! - [`FileStore`]: one JSON file per key under a directory.
//! - `SqliteStore`: a single `kv` table (requires the `sqlite` feature).

#[cfg(feature = "sqlite")]
mod sqlite;

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{PersistenceError, PersistenceResult};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Async key-value persistence.
///
/// `set` and `delete` must be durable when they return `Ok`; callers commit
/// in-memory state only after a successful write.
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Backend identifier used in errors and logs.
    fn backend(&self) -> &'static str;

    /// Reads a value. Missing keys are `Ok(None)`.
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()>;

    /// Deletes a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> PersistenceResult<()>;

    /// Lists keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> PersistenceResult<Vec<String>>;
}

/// A shared, type-erased store.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Reads and decodes a JSON value.
///
/// # Errors
///
/// Propagates read failures; returns [`PersistenceError::Corrupt`] if the
/// value does not decode as `T`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> PersistenceResult<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| PersistenceError::corrupt(key, e.to_string()))
}

/// Encodes and writes a JSON value.
///
/// # Errors
///
/// Returns [`PersistenceError::PersistenceWriteFailed`] on encode or write failure.
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> PersistenceResult<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| PersistenceError::write(store.backend(), key, e.to_string()))?;
    store.set(key, &raw).await
}

/// Storage key builders.
pub mod keys {
    use crate::chain::{Chain, ChainFamily, Network, normalize_address};

    /// `secret:{family}`
    #[must_use]
    pub fn secret(family: ChainFamily) -> String {
        format!("secret:{family}")
    }

    /// `wallets:{chain}`
    #[must_use]
    pub fn wallets(chain: Chain) -> String {
        format!("wallets:{chain}")
    }

    /// `ledger:{chain}:{network}:{address}` with the address normalized.
    #[must_use]
    pub fn ledger(chain: Chain, network: Network, address: &str) -> String {
        format!(
            "ledger:{chain}:{network}:{}",
            normalize_address(chain, address)
        )
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store.
///
/// Fast but not persistent across restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> PersistenceResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> PersistenceResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// File-based store.
///
/// Persists each key as a JSON file in a directory. Writes go to a temporary
/// file first and are renamed into place, so a crashed write never leaves a
/// truncated value behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Create a new file store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create a file store in the default location (`~/.walletx/store`).
    #[must_use]
    pub fn default_path() -> Self {
        let path = dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".walletx")
            .join("store");
        Self::new(path)
    }

    /// Directory holding the files.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", encode_key(key)))
    }

    async fn ensure_dir(&self, key: &str) -> PersistenceResult<()> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| PersistenceError::write("file", key, e.to_string()))
    }
}

/// Encodes a key as a file stem. `[A-Za-z0-9.-]` pass through; every other
/// byte becomes `_xx` (lowercase hex), which keeps the mapping reversible.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "_{byte:02x}");
        }
    }
    out
}

fn decode_key(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut iter = stem.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'_' {
            let hi = char::from(iter.next()?).to_digit(16)?;
            let lo = char::from(iter.next()?).to_digit(16)?;
            bytes.push(u8::try_from(hi * 16 + lo).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let path = self.key_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                debug!(key = %key, "loaded value from file");
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::read("file", key, e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.ensure_dir(key).await?;

        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| PersistenceError::write("file", key, e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| PersistenceError::write("file", key, e.to_string()))?;
        debug!(key = %key, bytes = value.len(), "saved value to file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> PersistenceResult<()> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => {
                debug!(key = %key, "deleted value file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::write("file", key, e.to_string())),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> PersistenceResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::read("file", prefix, e.to_string())),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::read("file", prefix, e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem()
                && let Some(key) = decode_key(&stem.to_string_lossy())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// Test doubles
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// A [`MemoryStore`] whose reads and writes can be made to fail on demand.
    #[derive(Debug, Default)]
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        fail_key: Mutex<Option<String>>,
    }

    impl FlakyStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Fails writes and deletes of one key only.
        pub(crate) fn fail_writes_to(&self, key: Option<&str>) {
            *self.fail_key.lock().unwrap() = key.map(str::to_string);
        }

        fn write_fails(&self, key: &str) -> bool {
            self.fail_writes.load(Ordering::SeqCst)
                || self.fail_key.lock().unwrap().as_deref() == Some(key)
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        fn backend(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(PersistenceError::read("flaky", key, "injected read failure"));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
            if self.write_fails(key) {
                return Err(PersistenceError::write("flaky", key, "injected write failure"));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> PersistenceResult<()> {
            if self.write_fails(key) {
                return Err(PersistenceError::write("flaky", key, "injected write failure"));
            }
            self.inner.delete(key).await
        }

        async fn keys_with_prefix(&self, prefix: &str) -> PersistenceResult<Vec<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(PersistenceError::read("flaky", prefix, "injected read failure"));
            }
            self.inner.keys_with_prefix(prefix).await
        }
    }
}
