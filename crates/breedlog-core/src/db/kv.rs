//! Key/value persistence backing the per-user record cache

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};

use super::Database;

/// One mutation in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Set { key: String, value: String },
    Remove { key: String },
}

impl KvWrite {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }

    fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// What a read-modify-write does with the key it read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvUpdate {
    Keep,
    Set(String),
    Remove,
}

/// Trait for string key/value storage (async)
///
/// `apply` is all-or-nothing: either every write in the batch lands or the
/// previous state is kept.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    /// Read a value; a missing key is `Ok(None)`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply a batch of writes atomically
    async fn apply(&self, writes: Vec<KvWrite>) -> Result<()>;

    /// Read one key and write its replacement as a single atomic step.
    ///
    /// No other writer, in this process or another one sharing the same
    /// database, can change `key` between the read and the write. An error
    /// from `update` leaves the key untouched.
    async fn update<T, F>(&self, key: &str, update: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Option<String>) -> Result<(KvUpdate, T)> + Send;

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(vec![KvWrite::set(key, value)]).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.apply(vec![KvWrite::remove(key)]).await
    }
}

/// `SQLite` implementation of `KeyValueStore`
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    db: Arc<AsyncMutex<Database>>,
}

impl SqliteKeyValueStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(AsyncMutex::new(db)),
        }
    }

    /// Open (or create) the store at a filesystem path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .connection()
            .query_row(
                "SELECT value FROM local_kv WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        for write in &writes {
            match write {
                KvWrite::Set { key, value } => {
                    tx.execute(
                        "INSERT INTO local_kv (key, value, updated_at) VALUES (?, ?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                        params![key, value, now],
                    )?;
                }
                KvWrite::Remove { key } => {
                    tx.execute("DELETE FROM local_kv WHERE key = ?", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn update<T, F>(&self, key: &str, update: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Option<String>) -> Result<(KvUpdate, T)> + Send,
    {
        let mut db = self.db.lock().await;
        // IMMEDIATE takes the write lock up front so a second process blocks
        // (up to the busy timeout) instead of reading the same snapshot.
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row(
                "SELECT value FROM local_kv WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        let (write, output) = update(current)?;
        match write {
            KvUpdate::Keep => {}
            KvUpdate::Set(value) => {
                tx.execute(
                    "INSERT INTO local_kv (key, value, updated_at) VALUES (?, ?, ?)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, chrono::Utc::now().timestamp_millis()],
                )?;
            }
            KvUpdate::Remove => {
                tx.execute("DELETE FROM local_kv WHERE key = ?", params![key])?;
            }
        }
        tx.commit()?;
        Ok(output)
    }
}

/// In-memory implementation of `KeyValueStore`.
///
/// Records every key it is asked about so callers can assert which
/// namespaces an operation touched. Writes can be made to fail on demand.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    touched: Arc<Mutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Keys read or written since creation (or the last `clear_touched`).
    pub fn touched_keys(&self) -> Vec<String> {
        self.touched
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    pub fn clear_touched(&self) {
        if let Ok(mut keys) = self.touched.lock() {
            keys.clear();
        }
    }

    /// Snapshot of all stored entries.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn touch(&self, key: &str) {
        if let Ok(mut keys) = self.touched.lock() {
            keys.push(key.to_string());
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.touch(key);
        let entries = self
            .entries
            .lock()
            .map_err(|error| Error::Persistence(error.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> Result<()> {
        for write in &writes {
            self.touch(write.key());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("simulated write failure".to_string()));
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|error| Error::Persistence(error.to_string()))?;
        for write in writes {
            match write {
                KvWrite::Set { key, value } => {
                    entries.insert(key, value);
                }
                KvWrite::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn update<T, F>(&self, key: &str, update: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Option<String>) -> Result<(KvUpdate, T)> + Send,
    {
        self.touch(key);
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| Error::Persistence(error.to_string()))?;

        let (write, output) = update(entries.get(key).cloned())?;
        if write != KvUpdate::Keep && self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("simulated write failure".to_string()));
        }
        match write {
            KvUpdate::Keep => {}
            KvUpdate::Set(value) => {
                entries.insert(key.to_string(), value);
            }
            KvUpdate::Remove => {
                entries.remove(key);
            }
        }
        Ok(output)
    }
}
