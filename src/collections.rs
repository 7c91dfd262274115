//! Saved ad hoc HTTP requests, grouped into named collections, and the
//! one-shot sender that executes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::REQUEST_TESTER_TIMEOUT_SECS;
use crate::encoder::with_default_content_type;
use crate::local_store::{LocalStore, LocalStoreError, SyncedValue};
use crate::model::{Header, HttpMethod};

pub const COLLECTIONS_KEY: &str = "loadscope.api_collections";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiTestItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Request definition as submitted by a client, before it gets an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiTestCollection {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<ApiTestItem>,
}

pub struct CollectionStore {
    collections: Arc<SyncedValue<Vec<ApiTestCollection>>>,
}

impl CollectionStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            collections: Arc::new(SyncedValue::new(store, COLLECTIONS_KEY)),
        }
    }

    pub fn spawn_sync(&self) -> tokio::task::JoinHandle<()> {
        self.collections.spawn_sync()
    }

    pub fn list(&self) -> Vec<ApiTestCollection> {
        self.collections.get()
    }

    pub fn create(&self, name: &str) -> Result<ApiTestCollection, LocalStoreError> {
        let collection = ApiTestCollection {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            items: Vec::new(),
        };
        let created = collection.clone();
        self.collections.update(|all| all.push(collection))?;
        Ok(created)
    }

    pub fn delete(&self, id: &str) -> Result<bool, LocalStoreError> {
        self.collections.update(|all| {
            let before = all.len();
            all.retain(|c| c.id != id);
            all.len() != before
        })
    }

    /// `None` when the collection does not exist.
    pub fn add_item(
        &self,
        collection_id: &str,
        request: ApiRequest,
    ) -> Result<Option<ApiTestItem>, LocalStoreError> {
        self.collections.update(|all| {
            let collection = all.iter_mut().find(|c| c.id == collection_id)?;
            let item = ApiTestItem {
                id: uuid::Uuid::new_v4().to_string(),
                name: if request.name.is_empty() {
                    format!("{} {}", request.method, request.url)
                } else {
                    request.name
                },
                method: request.method,
                url: request.url,
                headers: request.headers,
                body: request.body,
            };
            collection.items.push(item.clone());
            Some(item)
        })
    }

    pub fn remove_item(&self, collection_id: &str, item_id: &str) -> Result<bool, LocalStoreError> {
        self.collections.update(|all| {
            let Some(collection) = all.iter_mut().find(|c| c.id == collection_id) else {
                return false;
            };
            let before = collection.items.len();
            collection.items.retain(|i| i.id != item_id);
            collection.items.len() != before
        })
    }
}

// ============================================================================
// Request execution
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: String,
    /// Parsed body when the response is JSON.
    pub json: Option<Value>,
    pub elapsed_ms: f64,
    pub size_bytes: usize,
}

/// Execute one request and report what came back. Non-2xx statuses are
/// outcomes, not errors; only transport failures are.
pub async fn send_request(
    client: &reqwest::Client,
    request: &ApiRequest,
) -> Result<RequestOutcome, reqwest::Error> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut builder = client
        .request(method, &request.url)
        .timeout(Duration::from_secs(REQUEST_TESTER_TIMEOUT_SECS));
    for header in with_default_content_type(
        request.method,
        &request.headers,
        request.body.as_deref(),
    ) {
        builder = builder.header(header.key, header.value);
    }
    if let Some(body) = request.body.as_ref().filter(|b| !b.is_empty()) {
        builder = builder.body(body.clone());
    }

    let started = Instant::now();
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| Header::new(k.as_str(), v.to_str().unwrap_or_default()))
        .collect();
    let body = response.text().await?;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    Ok(RequestOutcome {
        status,
        headers,
        json: serde_json::from_str(&body).ok(),
        size_bytes: body.len(),
        body,
        elapsed_ms,
    })
}
