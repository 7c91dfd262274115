use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::config::LOG_BUFFER_SIZE;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Orchestrator,
    Worker,
    Seo,
    Store,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Ring buffer of diagnostic entries plus a broadcast feed for live tailing.
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<RwLock<VecDeque<LogEntry>>>,
    sender: broadcast::Sender<LogEntry>,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new()
    }
}

impl LogState {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(LOG_BUFFER_SIZE))),
            sender,
        }
    }

    pub async fn push(&self, entry: LogEntry) {
        let mut buf = self.buffer.write().await;
        if buf.len() >= LOG_BUFFER_SIZE {
            buf.pop_front();
        }
        buf.push_back(entry.clone());
        drop(buf);

        let _ = self.sender.send(entry);
    }

    pub async fn history(&self) -> Vec<LogEntry> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub async fn emit(&self, source: LogSource, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            source,
            level,
            worker: None,
            message: message.into(),
        };
        self.push(entry).await;
    }
}

/// Spawn a background task that forwards each line of a worker's stdout or
/// stderr into the log buffer, tagged with the worker's name.
pub fn spawn_line_reader<R>(
    reader: R,
    stream: OutputStream,
    worker_name: String,
    logs: &LogState,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let logs = logs.clone();

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let level = classify_log_level(&line, stream);
                    logs.push(LogEntry {
                        timestamp: Utc::now(),
                        source: LogSource::Worker,
                        level,
                        worker: Some(worker_name.clone()),
                        message: line,
                    })
                    .await;
                }
                Ok(None) => {
                    debug!("Worker {} {:?} closed", worker_name, stream);
                    break;
                }
                Err(e) => {
                    warn!("Error reading {:?} of worker {}: {}", stream, worker_name, e);
                    break;
                }
            }
        }
    })
}

/// k6 and lighthouse both write progress to stderr, so stderr lines are
/// only errors when they say so.
pub fn classify_log_level(line: &str, stream: OutputStream) -> LogLevel {
    let lower = line.to_ascii_lowercase();
    if lower.contains("level=error") || lower.contains("error:") || lower.contains("panic") {
        LogLevel::Error
    } else if lower.contains("level=warn") || lower.contains("warning") {
        LogLevel::Warn
    } else if lower.contains("level=debug") {
        LogLevel::Debug
    } else if stream == OutputStream::Stderr && lower.contains("error") {
        LogLevel::Error
    } else {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffer_is_bounded() {
        let logs = LogState::new();
        for i in 0..(LOG_BUFFER_SIZE + 5) {
            logs.emit(LogSource::Orchestrator, LogLevel::Info, format!("line {}", i))
                .await;
        }
        let history = logs.history().await;
        assert_eq!(history.len(), LOG_BUFFER_SIZE);
        assert_eq!(history[0].message, "line 5");
    }

    #[tokio::test]
    async fn test_line_reader_tags_worker() {
        let logs = LogState::new();
        let input: &[u8] = b"running (0m01.0s)\nlevel=error msg=\"boom\"\n";
        spawn_line_reader(input, OutputStream::Stderr, "w-1".to_string(), &logs)
            .await
            .unwrap();

        let history = logs.history().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.worker.as_deref() == Some("w-1")));
        assert_eq!(history[0].level, LogLevel::Info);
        assert_eq!(history[1].level, LogLevel::Error);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify_log_level("WARNING: slow", OutputStream::Stdout),
            LogLevel::Warn
        );
        assert_eq!(
            classify_log_level("an error happened", OutputStream::Stdout),
            LogLevel::Info
        );
        assert_eq!(
            classify_log_level("an error happened", OutputStream::Stderr),
            LogLevel::Error
        );
    }
}
