use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::local_store::{LocalStore, LocalStoreError, SyncedValue};
use crate::model::TestConfiguration;

pub const HISTORY_KEY: &str = "loadscope.history";

/// A saved configuration together with the result it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub config: TestConfiguration,
    #[serde(default)]
    pub result: Value,
}

impl HistoryItem {
    pub fn new(id: impl Into<String>, config: TestConfiguration, result: Value) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            config,
            result,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Import is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Import must be a JSON array of history items")]
    NotAnArray,

    #[error("History item {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("History item {index} is malformed: {source}")]
    MalformedItem {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] LocalStoreError),
}

const REQUIRED_FIELDS: [&str; 3] = ["id", "timestamp", "config"];

/// Most-recent-first list of saved runs. Every mutation rewrites the full
/// persisted list.
pub struct HistoryStore {
    items: Arc<SyncedValue<Vec<HistoryItem>>>,
}

impl HistoryStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            items: Arc::new(SyncedValue::new(store, HISTORY_KEY)),
        }
    }

    /// Follow writes made through other handles on the same store.
    pub fn spawn_sync(&self) -> tokio::task::JoinHandle<()> {
        self.items.spawn_sync()
    }

    pub fn read_all(&self) -> Vec<HistoryItem> {
        self.items.get()
    }

    /// Prepend `item`; existing entries keep their relative order.
    pub fn append(&self, item: HistoryItem) -> Result<(), HistoryError> {
        self.items.update(|items| items.insert(0, item))?;
        Ok(())
    }

    /// Returns whether an item with `id` existed.
    pub fn remove(&self, id: &str) -> Result<bool, HistoryError> {
        let removed = self.items.update(|items| {
            let before = items.len();
            items.retain(|i| i.id != id);
            items.len() != before
        })?;
        Ok(removed)
    }

    pub fn replace_all(&self, items: Vec<HistoryItem>) -> Result<(), HistoryError> {
        self.items.replace(items)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), HistoryError> {
        self.replace_all(Vec::new())
    }

    /// Keep the newest `keep` items; returns how many were dropped.
    pub fn prune(&self, keep: usize) -> Result<usize, HistoryError> {
        let dropped = self.items.update(|items| {
            let dropped = items.len().saturating_sub(keep);
            items.truncate(keep);
            dropped
        })?;
        Ok(dropped)
    }

    pub fn export(&self) -> Result<String, HistoryError> {
        serde_json::to_string_pretty(&self.read_all())
            .map_err(|e| HistoryError::Store(LocalStoreError::Serialize(e)))
    }

    /// Replace the history with an exported array. Every element is checked
    /// before anything is written; one bad element rejects the whole import
    /// and leaves the current history untouched.
    pub fn import(&self, json: &str) -> Result<usize, HistoryError> {
        let items = parse_import(json)?;
        let count = items.len();
        self.replace_all(items)?;
        Ok(count)
    }
}

pub fn parse_import(json: &str) -> Result<Vec<HistoryItem>, HistoryError> {
    let value: Value = serde_json::from_str(json).map_err(HistoryError::InvalidJson)?;
    let Value::Array(elements) = value else {
        return Err(HistoryError::NotAnArray);
    };

    for (index, element) in elements.iter().enumerate() {
        for field in REQUIRED_FIELDS {
            if element.get(field).is_none_or(Value::is_null) {
                return Err(HistoryError::MissingField { index, field });
            }
        }
    }

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            serde_json::from_value(element)
                .map_err(|source| HistoryError::MalformedItem { index, source })
        })
        .collect()
}
