use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info, warn};

use super::command::WorkerCommand;
use crate::log_capture::{spawn_line_reader, LogLevel, LogSource, LogState, OutputStream};
use crate::model::{ArtifactKind, RunId};

/// How a worker process ended. None of these abort the run: whether a
/// result exists is decided by the artifact showing up or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerExit {
    Exited { code: Option<i32>, success: bool },
    SpawnFailed { error: String },
    WaitFailed { error: String },
}

impl WorkerExit {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerExit::Exited { success: true, .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Worker capacity reached ({limit} running)")]
    Capacity { limit: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveWorker {
    pub name: String,
    pub run_id: RunId,
    pub kind: ArtifactKind,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// Returned as soon as the worker is spawned. Dropping it does not affect
/// the worker.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub kind: ArtifactKind,
    pub worker_name: String,
    exit: oneshot::Receiver<WorkerExit>,
}

impl RunHandle {
    /// Resolve once the worker process has exited.
    pub async fn wait(self) -> WorkerExit {
        self.exit.await.unwrap_or_else(|_| WorkerExit::WaitFailed {
            error: "exit monitor dropped".to_string(),
        })
    }
}

#[derive(Clone)]
pub struct WorkerLauncher {
    logs: LogState,
    active: Arc<RwLock<HashMap<String, ActiveWorker>>>,
    max_workers: Option<usize>,
}

impl WorkerLauncher {
    /// `max_workers = None` admits every launch.
    pub fn new(logs: LogState, max_workers: Option<usize>) -> Self {
        Self {
            logs,
            active: Arc::new(RwLock::new(HashMap::new())),
            max_workers,
        }
    }

    pub async fn active_workers(&self) -> Vec<ActiveWorker> {
        let mut workers: Vec<_> = self.active.read().await.values().cloned().collect();
        workers.sort_by_key(|w| w.started_at);
        workers
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Spawn a worker and return without waiting for it. Spawn failures are
    /// logged and reported through the handle, not as an error here; the
    /// only refusal is the optional capacity limit.
    pub async fn launch(
        &self,
        run_id: RunId,
        kind: ArtifactKind,
        command: WorkerCommand,
    ) -> Result<RunHandle, LaunchError> {
        self.reserve(&run_id, &[(kind, &command)]).await?;
        Ok(self.spawn_reserved(run_id, kind, command).await)
    }

    /// Launch every worker of one run, or none of them. Admission is decided
    /// for the whole batch before anything is spawned, so a refused run
    /// never leaves part of itself running.
    pub async fn launch_all(
        &self,
        run_id: RunId,
        commands: Vec<(ArtifactKind, WorkerCommand)>,
    ) -> Result<Vec<RunHandle>, LaunchError> {
        let batch: Vec<_> = commands.iter().map(|(kind, cmd)| (*kind, cmd)).collect();
        self.reserve(&run_id, &batch).await?;

        let mut handles = Vec::with_capacity(commands.len());
        for (kind, command) in commands {
            handles.push(self.spawn_reserved(run_id.clone(), kind, command).await);
        }
        Ok(handles)
    }

    /// Take one slot per command under a single lock so concurrent launches
    /// can't overshoot the limit.
    async fn reserve(
        &self,
        run_id: &RunId,
        batch: &[(ArtifactKind, &WorkerCommand)],
    ) -> Result<(), LaunchError> {
        let mut active = self.active.write().await;
        if let Some(limit) = self.max_workers {
            if active.len() + batch.len() > limit {
                warn!(
                    "Rejecting {} worker(s) for run {}: {} of {} slots in use",
                    batch.len(),
                    run_id,
                    active.len(),
                    limit
                );
                return Err(LaunchError::Capacity { limit });
            }
        }
        for (kind, command) in batch {
            active.insert(
                command.name.clone(),
                ActiveWorker {
                    name: command.name.clone(),
                    run_id: run_id.clone(),
                    kind: *kind,
                    pid: None,
                    started_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn spawn_reserved(
        &self,
        run_id: RunId,
        kind: ArtifactKind,
        command: WorkerCommand,
    ) -> RunHandle {
        let name = command.name.clone();

        let (exit_tx, exit_rx) = oneshot::channel();
        let handle = RunHandle {
            run_id: run_id.clone(),
            kind,
            worker_name: name.clone(),
            exit: exit_rx,
        };

        let spawned = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("Failed to spawn {} worker {}: {}", kind, name, e);
                error!("{}", msg);
                self.logs
                    .emit(LogSource::Orchestrator, LogLevel::Error, &msg)
                    .await;
                self.active.write().await.remove(&name);
                let _ = exit_tx.send(WorkerExit::SpawnFailed {
                    error: e.to_string(),
                });
                return handle;
            }
        };

        let pid = child.id();
        if let Some(worker) = self.active.write().await.get_mut(&name) {
            worker.pid = pid;
        }
        info!("Worker {} started for run {} (PID {:?})", name, run_id, pid);
        self.logs
            .emit(
                LogSource::Orchestrator,
                LogLevel::Info,
                format!("Started {} worker {} (PID: {:?})", kind, name, pid),
            )
            .await;

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputStream::Stdout, name.clone(), &self.logs);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputStream::Stderr, name.clone(), &self.logs);
        }

        let logs = self.logs.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => WorkerExit::Exited {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    error!("Error waiting for worker {}: {}", name, e);
                    WorkerExit::WaitFailed {
                        error: e.to_string(),
                    }
                }
            };

            active.write().await.remove(&name);

            let (level, msg) = match &exit {
                WorkerExit::Exited { success: true, .. } => {
                    (LogLevel::Info, format!("Worker {} exited normally", name))
                }
                WorkerExit::Exited { code, .. } => (
                    LogLevel::Warn,
                    format!("Worker {} exited with code {:?}", name, code),
                ),
                other => (
                    LogLevel::Error,
                    format!("Worker {} terminated unexpectedly: {:?}", name, other),
                ),
            };
            if exit.is_success() {
                info!("{}", msg);
            } else {
                warn!("{}", msg);
            }
            logs.emit(LogSource::Orchestrator, level, msg).await;

            // Nobody may be listening; that's fine.
            let _ = exit_tx.send(exit);
        });

        handle
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::encoder::EncodedConfig;
    use std::time::Duration;

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand {
            name: format!("test-{}", uuid::Uuid::new_v4().simple()),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: EncodedConfig::new(),
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_through_handle() {
        let logs = LogState::new();
        let launcher = WorkerLauncher::new(logs.clone(), None);

        let handle = launcher
            .launch(RunId::new(), ArtifactKind::Load, shell("echo hello; exit 3"))
            .await
            .unwrap();
        let exit = handle.wait().await;
        assert_eq!(
            exit,
            WorkerExit::Exited {
                code: Some(3),
                success: false
            }
        );
        assert_eq!(launcher.active_count().await, 0);

        // Give the stdout reader a moment to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = logs.history().await;
        assert!(history
            .iter()
            .any(|e| e.source == LogSource::Worker && e.message == "hello"));
    }

    #[tokio::test]
    async fn test_spawn_failure_does_not_error() {
        let launcher = WorkerLauncher::new(LogState::new(), None);
        let mut cmd = shell("true");
        cmd.program = "/definitely/not/a/binary".to_string();

        let handle = launcher
            .launch(RunId::new(), ArtifactKind::Audit, cmd)
            .await
            .unwrap();
        assert!(matches!(handle.wait().await, WorkerExit::SpawnFailed { .. }));
        assert_eq!(launcher.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_env_reaches_worker() {
        let logs = LogState::new();
        let launcher = WorkerLauncher::new(logs.clone(), None);
        let mut cmd = shell("echo \"target=$TARGET_URL\"");
        cmd.env
            .insert("TARGET_URL".to_string(), "https://example.com".to_string());

        let handle = launcher
            .launch(RunId::new(), ArtifactKind::Load, cmd)
            .await
            .unwrap();
        assert!(handle.wait().await.is_success());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(logs
            .history()
            .await
            .iter()
            .any(|e| e.message == "target=https://example.com"));
    }

    #[tokio::test]
    async fn test_capacity_limit_rejects_until_slot_frees() {
        let launcher = WorkerLauncher::new(LogState::new(), Some(1));

        let first = launcher
            .launch(RunId::new(), ArtifactKind::Load, shell("sleep 0.3"))
            .await
            .unwrap();
        assert_eq!(launcher.active_workers().await.len(), 1);

        let second = launcher
            .launch(RunId::new(), ArtifactKind::Load, shell("true"))
            .await;
        assert!(matches!(second, Err(LaunchError::Capacity { limit: 1 })));

        first.wait().await;
        let third = launcher
            .launch(RunId::new(), ArtifactKind::Load, shell("true"))
            .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_launch_all_is_all_or_nothing() {
        let launcher = WorkerLauncher::new(LogState::new(), Some(1));

        let refused = launcher
            .launch_all(
                RunId::new(),
                vec![
                    (ArtifactKind::Load, shell("sleep 0.3")),
                    (ArtifactKind::Audit, shell("sleep 0.3")),
                ],
            )
            .await;
        assert!(matches!(refused, Err(LaunchError::Capacity { limit: 1 })));
        assert_eq!(launcher.active_count().await, 0);

        let handles = launcher
            .launch_all(RunId::new(), vec![(ArtifactKind::Load, shell("true"))])
            .await
            .unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert!(handle.wait().await.is_success());
        }
    }
}
