//! Submission and retrieval of test runs: the server half of the polling
//! protocol.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::log_capture::{LogLevel, LogSource};
use crate::model::{ArtifactKey, ArtifactKind, RunId, TestConfiguration};
use crate::result_store::ResultLookup;
use crate::state::SharedState;
use crate::worker::{RunHandle, WorkerCommand, WorkerExit};

/// Exit records are only useful while someone might still be polling.
const EXIT_RETENTION_MINS: i64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub run_id: RunId,
    pub artifacts: Vec<ArtifactKind>,
    pub workers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    Found(Value),
    /// Not ready. Carries the worker's exit if it has already ended, so a
    /// client may decide to stop early.
    Pending { worker: Option<WorkerExit> },
}

#[derive(Debug, Clone)]
struct ExitRecord {
    exit: WorkerExit,
    recorded_at: DateTime<Utc>,
}

/// Remembers how each run's workers ended.
#[derive(Default)]
pub struct RunTracker {
    exits: RwLock<HashMap<ArtifactKey, ExitRecord>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_exit(&self, key: ArtifactKey, exit: WorkerExit) {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(EXIT_RETENTION_MINS);
        let mut exits = self.exits.write().await;
        exits.retain(|_, r| r.recorded_at > cutoff);
        exits.insert(
            key,
            ExitRecord {
                exit,
                recorded_at: now,
            },
        );
    }

    pub async fn exit_of(&self, key: &ArtifactKey) -> Option<WorkerExit> {
        self.exits.read().await.get(key).map(|r| r.exit.clone())
    }

    pub async fn forget(&self, key: &ArtifactKey) {
        self.exits.write().await.remove(key);
    }
}

/// Validate, mint a run id and start one producer per enabled feature.
/// Returns as soon as everything is spawned.
pub async fn submit(
    state: &SharedState,
    config: TestConfiguration,
) -> Result<Submission, OrchestratorError> {
    config.validate()?;

    let run_id = RunId::new();
    let artifacts = config.enabled_kinds();
    let mut workers = Vec::new();

    info!("Submitting run {} for {} ({:?})", run_id, config.url, artifacts);
    state
        .logs
        .emit(
            LogSource::Orchestrator,
            LogLevel::Info,
            format!("Run {} submitted for {}", run_id, config.url),
        )
        .await;

    let commands: Vec<_> = artifacts
        .iter()
        .filter_map(|kind| match kind {
            ArtifactKind::Load => Some((
                *kind,
                WorkerCommand::load_test(&state.worker_settings, &run_id, &config),
            )),
            ArtifactKind::Audit => Some((
                *kind,
                WorkerCommand::audit(&state.worker_settings, &run_id, &config),
            )),
            ArtifactKind::Seo => None,
        })
        .collect();

    // All container workers are admitted together; a refused run starts
    // nothing, SEO included.
    for handle in state.launcher.launch_all(run_id.clone(), commands).await? {
        workers.push(handle.worker_name.clone());
        track_exit(state, handle);
    }

    if artifacts.contains(&ArtifactKind::Seo) {
        state.seo.spawn(run_id.clone(), config.url.clone());
    }

    if let Err(e) = state.recent_urls.record(&config.url) {
        warn!("Failed to record recent URL: {}", e);
        state
            .logs
            .emit(
                LogSource::Store,
                LogLevel::Warn,
                format!("Failed to record recent URL {}: {}", config.url, e),
            )
            .await;
    }

    Ok(Submission {
        run_id,
        artifacts,
        workers,
    })
}

fn track_exit(state: &SharedState, handle: RunHandle) {
    let state = state.clone();
    tokio::spawn(async move {
        let key = ArtifactKey::new(handle.run_id.clone(), handle.kind);
        let exit = handle.wait().await;
        state.runs.record_exit(key, exit).await;
    });
}

/// One poll: hand out the artifact if it exists (consuming it) or report
/// that it is still pending.
pub async fn poll(
    state: &SharedState,
    run_id: &str,
    kind: &str,
) -> Result<PollResponse, OrchestratorError> {
    let run_id =
        RunId::parse(run_id).ok_or_else(|| OrchestratorError::InvalidRunId(run_id.to_string()))?;
    let kind: ArtifactKind = kind
        .parse()
        .map_err(OrchestratorError::InvalidArtifactKind)?;
    let key = ArtifactKey::new(run_id, kind);

    match state.results.take(&key).await {
        Ok(ResultLookup::Found(value)) => {
            state.runs.forget(&key).await;
            state
                .logs
                .emit(
                    LogSource::Store,
                    LogLevel::Info,
                    format!("Delivered result {}", key),
                )
                .await;
            Ok(PollResponse::Found(value))
        }
        Ok(ResultLookup::Pending) => Ok(PollResponse::Pending {
            worker: state.runs.exit_of(&key).await,
        }),
        Err(e) => {
            state
                .logs
                .emit(
                    LogSource::Store,
                    LogLevel::Error,
                    format!("Failed to read result {}: {}", key, e),
                )
                .await;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracker_records_and_forgets() {
        let tracker = RunTracker::new();
        let key = ArtifactKey::new(RunId::new(), ArtifactKind::Load);
        assert!(tracker.exit_of(&key).await.is_none());

        let exit = WorkerExit::Exited {
            code: Some(1),
            success: false,
        };
        tracker.record_exit(key.clone(), exit.clone()).await;
        assert_eq!(tracker.exit_of(&key).await, Some(exit));

        tracker.forget(&key).await;
        assert!(tracker.exit_of(&key).await.is_none());
    }
}
