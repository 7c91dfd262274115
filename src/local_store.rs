//! Key-value persistence for client-side state (history, recent URLs,
//! saved request collections).
//!
//! Each key holds one complete JSON document that is replaced wholesale on
//! every write. Writes are announced on a broadcast channel so that other
//! handles on the same key can reload their in-memory copy; the last writer
//! wins and nothing is merged.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Announces that `key` was overwritten by the handle identified by `origin`.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: String,
}

pub struct LocalStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<StorageEvent>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self, LocalStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, LocalStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LocalStoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        ",
        )?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_raw(&self, key: &str, value: &str, origin: &str) -> Result<(), LocalStoreError> {
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, chrono::Utc::now().to_rfc3339()],
            )?;
        }
        self.announce(key, origin);
        Ok(())
    }

    pub fn remove(&self, key: &str, origin: &str) -> Result<(), LocalStoreError> {
        {
            let conn = self.conn();
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        self.announce(key, origin);
        Ok(())
    }

    /// Read and parse `key`. Missing keys, unreadable rows and corrupt JSON
    /// all fall back to `T::default()`; corruption is logged, never raised.
    pub fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get_raw(key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Stored value for '{}' is corrupt, using default: {}", key, e);
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                warn!("Failed to read '{}' from local store: {}", key, e);
                T::default()
            }
        }
    }

    pub fn write<T: Serialize>(&self, key: &str, value: &T, origin: &str) -> Result<(), LocalStoreError> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw, origin)
    }

    fn announce(&self, key: &str, origin: &str) {
        // No subscribers is normal.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            origin: origin.to_string(),
        });
    }
}

/// One key of the [`LocalStore`] mirrored in memory. Mutations rewrite the
/// whole persisted value; writes by other handles replace the mirror.
pub struct SyncedValue<T> {
    store: Arc<LocalStore>,
    key: &'static str,
    origin: String,
    cache: RwLock<T>,
}

impl<T> SyncedValue<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<LocalStore>, key: &'static str) -> Self {
        let initial = store.read_or_default(key);
        Self {
            store,
            key,
            origin: uuid::Uuid::new_v4().to_string(),
            cache: RwLock::new(initial),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn get(&self) -> T {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply `f` to a copy, persist the copy, then publish it. On a failed
    /// write the mirror keeps its previous value.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, LocalStoreError> {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let mut next = cache.clone();
        let out = f(&mut next);
        self.store.write(self.key, &next, &self.origin)?;
        *cache = next;
        Ok(out)
    }

    pub fn replace(&self, value: T) -> Result<(), LocalStoreError> {
        self.update(|current| *current = value)
    }

    /// Discard the mirror and reload from the store.
    pub fn resync(&self) {
        let fresh: T = self.store.read_or_default(self.key);
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    /// Returns true if the event was for this key from another handle and
    /// the mirror was reloaded.
    pub fn handle_event(&self, event: &StorageEvent) -> bool {
        if event.key != self.key || event.origin == self.origin {
            return false;
        }
        debug!("'{}' changed elsewhere, resynchronising", self.key);
        self.resync();
        true
    }

    /// Keep this handle in sync for as long as it is alive.
    pub fn spawn_sync(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut rx = self.store.subscribe();

        tokio::spawn(async move {
            loop {
                let event = rx.recv().await;
                let Some(this) = weak.upgrade() else { break };
                match event {
                    Ok(event) => {
                        this.handle_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Missed {} storage events, resynchronising", skipped);
                        this.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
