use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::collections::CollectionStore;
use crate::config::OrchestratorConfig;
use crate::history::HistoryStore;
use crate::local_store::LocalStore;
use crate::log_capture::LogState;
use crate::recent_urls::RecentUrls;
use crate::result_store::{FileResultStore, ResultStore};
use crate::runs::RunTracker;
use crate::seo::SeoAnalyzer;
use crate::worker::{WorkerLauncher, WorkerSettings};

pub type SharedState = Arc<AppState>;

/// Everything a request handler can reach. Built once at startup and passed
/// around explicitly.
pub struct AppState {
    pub config: OrchestratorConfig,
    pub worker_settings: WorkerSettings,
    pub launcher: WorkerLauncher,
    pub results: Arc<dyn ResultStore>,
    pub runs: RunTracker,
    pub seo: SeoAnalyzer,
    pub history: HistoryStore,
    pub recent_urls: RecentUrls,
    pub collections: CollectionStore,
    pub logs: LogState,
    pub http_client: reqwest::Client,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the on-disk stores named by `config`.
    pub fn new(config: OrchestratorConfig) -> anyhow::Result<Self> {
        let results: Arc<dyn ResultStore> = Arc::new(FileResultStore::new(&config.output_dir)?);
        let local = Arc::new(LocalStore::open(&config.local_store_path())?);
        Self::with_stores(config, results, local)
    }

    /// Assemble state around caller-provided stores.
    pub fn with_stores(
        config: OrchestratorConfig,
        results: Arc<dyn ResultStore>,
        local: Arc<LocalStore>,
    ) -> anyhow::Result<Self> {
        let logs = LogState::new();
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("loadscope/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let seo = SeoAnalyzer::new(
            http_client.clone(),
            config.seo_endpoint.clone(),
            config.seo_model.clone(),
            config.seo_api_key.clone(),
            results.clone(),
            logs.clone(),
        );

        Ok(Self {
            worker_settings: WorkerSettings::from_config(&config),
            launcher: WorkerLauncher::new(logs.clone(), config.max_workers),
            results,
            runs: RunTracker::new(),
            seo,
            history: HistoryStore::new(local.clone()),
            recent_urls: RecentUrls::new(local.clone()),
            collections: CollectionStore::new(local),
            logs,
            http_client,
            started_at: Utc::now(),
            config,
        })
    }

    /// Start the tasks that keep the local-store mirrors in sync.
    pub fn spawn_background(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.history.spawn_sync(),
            self.recent_urls.spawn_sync(),
            self.collections.spawn_sync(),
        ]
    }
}
