//! Per-run result slots with read-once consumption.
//!
//! A worker writes exactly one artifact per [`ArtifactKey`]; the first
//! successful [`ResultStore::take`] hands it out and removes it, so every
//! later `take` for the same key reports [`ResultLookup::Pending`] again.
//! "Pending" is the normal state while a worker is still running and is not
//! an error.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::model::ArtifactKey;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    Found(Value),
    Pending,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on artifact {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact {key} is not valid JSON: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Artifact {key} was already delivered")]
    AlreadyDelivered { key: String },
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Publish an artifact. Used by in-process producers; container workers
    /// write the file themselves.
    async fn put(&self, key: &ArtifactKey, value: &Value) -> Result<(), StoreError>;

    /// Consume the artifact if present. Destructive on success.
    async fn take(&self, key: &ArtifactKey) -> Result<ResultLookup, StoreError>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// Artifacts live as `<kind>-<run_id>.json` in a directory shared with the
/// workers.
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn scratch_path(&self, key: &ArtifactKey, tag: &str) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}-{}",
            key.file_name(),
            tag,
            uuid::Uuid::new_v4().simple()
        ))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn put(&self, key: &ArtifactKey, value: &Value) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            source: e,
        })?;

        // Write aside and rename so a concurrent take never sees half a file.
        let tmp = self.scratch_path(key, "partial");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, self.path_for(key))
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn take(&self, key: &ArtifactKey) -> Result<ResultLookup, StoreError> {
        let path = self.path_for(key);

        // Claim by rename: of two concurrent takes only one can win, which
        // keeps delivery at-most-once without a lock.
        let claimed = self.scratch_path(key, "claimed");
        match tokio::fs::rename(&path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ResultLookup::Pending),
            Err(e) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source: e,
                })
            }
        }

        let parsed = match tokio::fs::read(&claimed).await {
            Ok(content) => {
                serde_json::from_slice(&content).map_err(|e| StoreError::Malformed {
                    key: key.to_string(),
                    source: e,
                })
            }
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            }),
        };

        // Only a parsed artifact is consumed. Anything else goes back where
        // the worker left it, so a later take (or a manual retry) sees it.
        let value = match parsed {
            Ok(value) => value,
            Err(e) => {
                if let Err(restore) = tokio::fs::rename(&claimed, &path).await {
                    warn!(
                        "Failed to restore unreadable artifact {:?}: {}",
                        claimed, restore
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::remove_file(&claimed).await {
            warn!("Failed to remove consumed artifact {:?}: {}", claimed, e);
        }
        debug!("Delivered artifact {}", key);
        Ok(ResultLookup::Found(value))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Lifecycle of one slot in [`MemoryResultStore`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Pending,
    Ready { value: Value },
    Delivered,
}

/// Keeps each slot as an explicit `pending -> ready -> delivered` record
/// instead of relying on file presence.
#[derive(Default)]
pub struct MemoryResultStore {
    slots: Mutex<HashMap<ArtifactKey, SlotState>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot a worker is expected to fill.
    pub fn expect(&self, key: ArtifactKey) {
        self.lock().entry(key).or_insert(SlotState::Pending);
    }

    pub fn state(&self, key: &ArtifactKey) -> Option<SlotState> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactKey, SlotState>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    /// Fills a pending (or unregistered) slot. A delivered slot stays
    /// delivered; a second put for it is refused.
    async fn put(&self, key: &ArtifactKey, value: &Value) -> Result<(), StoreError> {
        let mut slots = self.lock();
        if matches!(slots.get(key), Some(SlotState::Delivered)) {
            return Err(StoreError::AlreadyDelivered {
                key: key.to_string(),
            });
        }
        slots.insert(
            key.clone(),
            SlotState::Ready {
                value: value.clone(),
            },
        );
        Ok(())
    }

    async fn take(&self, key: &ArtifactKey) -> Result<ResultLookup, StoreError> {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(key) else {
            return Ok(ResultLookup::Pending);
        };
        if !matches!(slot, SlotState::Ready { .. }) {
            return Ok(ResultLookup::Pending);
        }
        match std::mem::replace(slot, SlotState::Delivered) {
            SlotState::Ready { value } => Ok(ResultLookup::Found(value)),
            _ => Ok(ResultLookup::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactKind, RunId};
    use serde_json::json;
    use tempfile::TempDir;

    fn key() -> ArtifactKey {
        ArtifactKey::new(RunId::new(), ArtifactKind::Load)
    }

    #[tokio::test]
    async fn test_file_take_is_read_once() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path()).unwrap();
        let key = key();

        assert_eq!(store.take(&key).await.unwrap(), ResultLookup::Pending);

        std::fs::write(store.path_for(&key), r#"{"metrics":{"http_reqs":{"count":12}}}"#)
            .unwrap();

        let first = store.take(&key).await.unwrap();
        assert_eq!(
            first,
            ResultLookup::Found(json!({"metrics": {"http_reqs": {"count": 12}}}))
        );
        assert_eq!(store.take(&key).await.unwrap(), ResultLookup::Pending);
        assert!(!store.path_for(&key).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_file_malformed_json_is_hard_failure() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path()).unwrap();
        let key = key();
        std::fs::write(store.path_for(&key), "{ not json").unwrap();

        let err = store.take(&key).await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_file_unparseable_artifact_is_kept_for_retry() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path()).unwrap();
        let key = key();

        // A summary export caught half-written.
        std::fs::write(store.path_for(&key), r#"{"metrics": {"http_reqs""#).unwrap();
        assert!(store.take(&key).await.is_err());
        assert!(store.path_for(&key).exists());
        assert!(store.take(&key).await.is_err());

        std::fs::write(store.path_for(&key), r#"{"metrics": {"http_reqs": {"count": 3}}}"#)
            .unwrap();
        assert_eq!(
            store.take(&key).await.unwrap(),
            ResultLookup::Found(json!({"metrics": {"http_reqs": {"count": 3}}}))
        );
        assert!(!store.path_for(&key).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_file_put_then_take() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path().join("nested")).unwrap();
        let key = key();

        store.put(&key, &json!({"score": 0.93})).await.unwrap();
        assert_eq!(
            store.take(&key).await.unwrap(),
            ResultLookup::Found(json!({"score": 0.93}))
        );
    }

    #[tokio::test]
    async fn test_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = FileResultStore::new(dir.path()).unwrap();
        let run = RunId::new();
        let load = ArtifactKey::new(run.clone(), ArtifactKind::Load);
        let audit = ArtifactKey::new(run, ArtifactKind::Audit);

        store.put(&load, &json!({"kind": "load"})).await.unwrap();
        assert_eq!(store.take(&audit).await.unwrap(), ResultLookup::Pending);
        assert!(matches!(
            store.take(&load).await.unwrap(),
            ResultLookup::Found(_)
        ));
    }

    #[tokio::test]
    async fn test_memory_slot_transitions() {
        let store = MemoryResultStore::new();
        let key = key();

        assert_eq!(store.state(&key), None);
        store.expect(key.clone());
        assert_eq!(store.state(&key), Some(SlotState::Pending));
        assert_eq!(store.take(&key).await.unwrap(), ResultLookup::Pending);

        store.put(&key, &json!({"ok": true})).await.unwrap();
        assert_eq!(
            store.take(&key).await.unwrap(),
            ResultLookup::Found(json!({"ok": true}))
        );
        assert_eq!(store.state(&key), Some(SlotState::Delivered));
        assert_eq!(store.take(&key).await.unwrap(), ResultLookup::Pending);
    }

    #[tokio::test]
    async fn test_memory_delivered_slot_refuses_second_put() {
        let store = MemoryResultStore::new();
        let key = key();

        store.put(&key, &json!({"n": 1})).await.unwrap();
        assert!(matches!(
            store.take(&key).await.unwrap(),
            ResultLookup::Found(_)
        ));

        let err = store.put(&key, &json!({"n": 2})).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyDelivered { .. }));
        assert_eq!(store.state(&key), Some(SlotState::Delivered));
        assert_eq!(store.take(&key).await.unwrap(), ResultLookup::Pending);
    }
}
