use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use loadscope::client::{ClientError, OrchestratorClient};
use loadscope::config::OrchestratorConfig;
use loadscope::local_store::LocalStore;
use loadscope::model::{ArtifactKey, ArtifactKind, RunId, TestConfiguration};
use loadscope::poller::{CompletionPoller, PollerState};
use loadscope::result_store::{MemoryResultStore, ResultStore};
use loadscope::server::build_router;
use loadscope::state::AppState;

async fn start_server(dir: &std::path::Path, store: Arc<MemoryResultStore>) -> String {
    let config = OrchestratorConfig {
        port: 0,
        data_dir: dir.to_path_buf(),
        output_dir: dir.join("results"),
        scripts_dir: dir.join("scripts"),
        docker_bin: "true".to_string(),
        load_image: "grafana/k6:latest".to_string(),
        audit_image: "femtopixel/google-lighthouse:latest".to_string(),
        max_workers: Some(0),
        seo_endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
        seo_model: "test-model".to_string(),
        seo_api_key: None,
        log_file: None,
    };
    let local = Arc::new(LocalStore::in_memory().unwrap());
    let state = Arc::new(AppState::with_stores(config, store, local).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_poller_completes_once_result_lands() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryResultStore::new());
    let base = start_server(dir.path(), store.clone()).await;

    let client = OrchestratorClient::new(&base).unwrap();
    let run_id = RunId::new();
    let source = client.result(&run_id, ArtifactKind::Load).unwrap();

    let writer = store.clone();
    let key = ArtifactKey::new(run_id.clone(), ArtifactKind::Load);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        writer
            .put(&key, &json!({"metrics": {"iterations": {"count": 300}}}))
            .await
            .unwrap();
    });

    let mut poller = CompletionPoller::new(Duration::from_millis(25), 200);
    let outcome = poller.run(&source).await;
    assert_eq!(
        outcome,
        PollerState::Complete {
            result: json!({"metrics": {"iterations": {"count": 300}}})
        }
    );
}

#[tokio::test]
async fn test_poller_times_out_when_nothing_arrives() {
    let dir = TempDir::new().unwrap();
    let base = start_server(dir.path(), Arc::new(MemoryResultStore::new())).await;

    let client = OrchestratorClient::new(&base).unwrap();
    let source = client.result(&RunId::new(), ArtifactKind::Audit).unwrap();

    let mut poller = CompletionPoller::new(Duration::from_millis(5), 3);
    assert_eq!(
        poller.run(&source).await,
        PollerState::TimedOut { attempts: 3 }
    );
}

#[tokio::test]
async fn test_submit_surfaces_server_rejection() {
    let dir = TempDir::new().unwrap();
    let base = start_server(dir.path(), Arc::new(MemoryResultStore::new())).await;
    let client = OrchestratorClient::new(&base).unwrap();

    let mut config = TestConfiguration::load_test("https://example.com");
    config.run_load_test = false;
    match client.submit(&config).await {
        Err(ClientError::Rejected { status, message }) => {
            assert_eq!(status.as_u16(), 422);
            assert!(message.contains("At least one"));
        }
        other => panic!("expected rejection, got {:?}", other.map(|s| s.run_id)),
    }

    // The server was started with no worker capacity.
    let config = TestConfiguration::load_test("https://example.com");
    match client.submit(&config).await {
        Err(ClientError::Rejected { status, .. }) => assert_eq!(status.as_u16(), 503),
        other => panic!("expected capacity rejection, got {:?}", other.map(|s| s.run_id)),
    }
}
