//! Client-side completion loop: ask "is the result ready?" on a fixed
//! interval until it is, until the source reports a hard failure, or until
//! the attempt budget runs out.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{POLL_INTERVAL_SECS, POLL_MAX_ATTEMPTS};
use crate::model::ArtifactKey;
use crate::result_store::{ResultLookup, ResultStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Polling { attempt: u32 },
    Complete { result: Value },
    Failed { error: String },
    TimedOut { attempts: u32 },
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollerState::Complete { .. } | PollerState::Failed { .. } | PollerState::TimedOut { .. }
        )
    }
}

/// Something that can be asked for a run's result. `Err` is a hard failure
/// and ends polling; `Ok(Pending)` schedules another check.
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn check(&self) -> Result<ResultLookup, String>;
}

/// Polls a [`ResultStore`] directly, for in-process callers.
pub struct StoreSource {
    store: Arc<dyn ResultStore>,
    key: ArtifactKey,
}

impl StoreSource {
    pub fn new(store: Arc<dyn ResultStore>, key: ArtifactKey) -> Self {
        Self { store, key }
    }
}

#[async_trait]
impl PollSource for StoreSource {
    async fn check(&self) -> Result<ResultLookup, String> {
        self.store.take(&self.key).await.map_err(|e| e.to_string())
    }
}

pub struct CompletionPoller {
    interval: Duration,
    max_attempts: u32,
    state: PollerState,
}

impl Default for CompletionPoller {
    fn default() -> Self {
        Self::new(Duration::from_secs(POLL_INTERVAL_SECS), POLL_MAX_ATTEMPTS)
    }
}

impl CompletionPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    pub async fn run<S: PollSource + ?Sized>(&mut self, source: &S) -> PollerState {
        self.run_with(source, |_| {}).await
    }

    /// Drive the loop to a terminal state, reporting every transition to
    /// `on_state`. Dropping the future abandons the loop; nothing is sent
    /// to the worker or the store.
    pub async fn run_with<S, F>(&mut self, source: &S, mut on_state: F) -> PollerState
    where
        S: PollSource + ?Sized,
        F: FnMut(&PollerState),
    {
        let mut pending_checks: u32 = 0;

        loop {
            self.transition(
                PollerState::Polling {
                    attempt: pending_checks + 1,
                },
                &mut on_state,
            );

            match source.check().await {
                Ok(ResultLookup::Found(result)) => {
                    info!("Result ready after {} attempt(s)", pending_checks + 1);
                    self.transition(PollerState::Complete { result }, &mut on_state);
                    break;
                }
                Ok(ResultLookup::Pending) => {
                    pending_checks += 1;
                    if pending_checks >= self.max_attempts {
                        warn!("Gave up after {} pending checks", pending_checks);
                        self.transition(
                            PollerState::TimedOut {
                                attempts: pending_checks,
                            },
                            &mut on_state,
                        );
                        break;
                    }
                    debug!(
                        "Result pending ({}/{}), next check in {:?}",
                        pending_checks, self.max_attempts, self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                }
                Err(error) => {
                    warn!("Polling failed: {}", error);
                    self.transition(PollerState::Failed { error }, &mut on_state);
                    break;
                }
            }
        }

        self.state.clone()
    }

    fn transition<F: FnMut(&PollerState)>(&mut self, next: PollerState, on_state: &mut F) {
        self.state = next;
        on_state(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Pending until call number `ready_on`, then found.
    struct Scripted {
        calls: AtomicU32,
        ready_on: Option<u32>,
        fail_on: Option<u32>,
    }

    impl Scripted {
        fn ready_on(n: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_on: Some(n),
                fail_on: None,
            }
        }

        fn never() -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_on: None,
                fail_on: None,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollSource for Scripted {
        async fn check(&self) -> Result<ResultLookup, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err("permission denied".to_string());
            }
            if self.ready_on.is_some_and(|n| call >= n) {
                return Ok(ResultLookup::Found(json!({"call": call})));
            }
            Ok(ResultLookup::Pending)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_when_artifact_appears() {
        let source = Scripted::ready_on(4);
        let mut poller = CompletionPoller::default();
        let start = tokio::time::Instant::now();

        let state = poller.run(&source).await;
        assert_eq!(state, PollerState::Complete { result: json!({"call": 4}) });
        assert_eq!(source.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3 * POLL_INTERVAL_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_on_last_attempt_never_beyond() {
        let source = Scripted::never();
        let mut poller = CompletionPoller::default();

        let state = poller.run(&source).await;
        assert_eq!(
            state,
            PollerState::TimedOut {
                attempts: POLL_MAX_ATTEMPTS
            }
        );
        assert_eq!(source.calls(), POLL_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_final_attempt() {
        let source = Scripted::ready_on(POLL_MAX_ATTEMPTS);
        let mut poller = CompletionPoller::default();

        let state = poller.run(&source).await;
        assert!(matches!(state, PollerState::Complete { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_failure_stops_immediately() {
        let source = Scripted {
            calls: AtomicU32::new(0),
            ready_on: Some(10),
            fail_on: Some(2),
        };
        let mut poller = CompletionPoller::new(Duration::from_secs(1), 5);

        let state = poller.run(&source).await;
        assert_eq!(
            state,
            PollerState::Failed {
                error: "permission denied".to_string()
            }
        );
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_reported_in_order() {
        let source = Scripted::ready_on(2);
        let mut poller = CompletionPoller::new(Duration::from_secs(1), 5);
        assert_eq!(poller.state(), &PollerState::Idle);

        let mut seen = Vec::new();
        poller.run_with(&source, |s| seen.push(s.clone())).await;
        assert_eq!(
            seen,
            vec![
                PollerState::Polling { attempt: 1 },
                PollerState::Polling { attempt: 2 },
                PollerState::Complete {
                    result: json!({"call": 2})
                },
            ]
        );
        assert!(poller.state().is_terminal());
    }
}
