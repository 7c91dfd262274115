use std::sync::Arc;

use crate::config::RECENT_URLS_LIMIT;
use crate::local_store::{LocalStore, LocalStoreError, SyncedValue};

pub const RECENT_URLS_KEY: &str = "loadscope.recent_urls";

/// Most-recent-first list of tested URLs, deduplicated and capped.
pub struct RecentUrls {
    urls: Arc<SyncedValue<Vec<String>>>,
}

impl RecentUrls {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            urls: Arc::new(SyncedValue::new(store, RECENT_URLS_KEY)),
        }
    }

    pub fn spawn_sync(&self) -> tokio::task::JoinHandle<()> {
        self.urls.spawn_sync()
    }

    pub fn list(&self) -> Vec<String> {
        self.urls.get()
    }

    pub fn record(&self, url: &str) -> Result<(), LocalStoreError> {
        self.urls.update(|urls| {
            urls.retain(|u| u != url);
            urls.insert(0, url.to_string());
            urls.truncate(RECENT_URLS_LIMIT);
        })
    }

    pub fn clear(&self) -> Result<(), LocalStoreError> {
        self.urls.replace(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_moves_duplicate_to_front() {
        let recent = RecentUrls::new(Arc::new(LocalStore::in_memory().unwrap()));
        recent.record("https://a.example").unwrap();
        recent.record("https://b.example").unwrap();
        recent.record("https://a.example").unwrap();
        assert_eq!(recent.list(), vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_list_is_capped() {
        let recent = RecentUrls::new(Arc::new(LocalStore::in_memory().unwrap()));
        for i in 0..(RECENT_URLS_LIMIT + 3) {
            recent.record(&format!("https://{}.example", i)).unwrap();
        }
        let list = recent.list();
        assert_eq!(list.len(), RECENT_URLS_LIMIT);
        assert_eq!(list[0], format!("https://{}.example", RECENT_URLS_LIMIT + 2));
    }
}
