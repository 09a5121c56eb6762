//! A single watch task: patterns, captured output, and terminal state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::WatchError;

/// Lines of recent output retained per task when the caller gives no bound.
pub const DEFAULT_BUFFER_LINES: usize = 100;

/// Lifecycle of a watch task. Every state except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    Running,
    Complete,
    Timeout,
    Cancelled,
    Error,
}

impl WatchStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// Caller-supplied parameters for a new watch.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub port: String,
    pub patterns: Vec<String>,
    pub timeout: Duration,
    #[serde(default = "default_buffer_lines")]
    pub buffer_lines: usize,
}

fn default_buffer_lines() -> usize {
    DEFAULT_BUFFER_LINES
}

/// Point-in-time view of a task, safe to serialize for callers.
#[derive(Debug, Clone, Serialize)]
pub struct WatchSnapshot {
    pub id: Uuid,
    pub port: String,
    pub status: WatchStatus,
    pub output: Vec<String>,
    pub matched_pattern: Option<String>,
    pub elapsed_ms: u64,
}

struct TaskState {
    status: WatchStatus,
    lines: VecDeque<String>,
    matched_pattern: Option<String>,
    finished_seq: Option<u64>,
    /// Elapsed time frozen at the terminal transition.
    finished_elapsed: Option<Duration>,
}

/// Monotonic finish order across all tasks, used by the retention sweep.
static FINISH_SEQ: AtomicU64 = AtomicU64::new(0);

/// One pattern watch over a port's line stream.
pub struct WatchTask {
    id: Uuid,
    port: String,
    patterns: Vec<(String, Regex)>,
    buffer_lines: usize,
    timeout: Duration,
    started: tokio::time::Instant,
    state: Mutex<TaskState>,
    /// Cancelled when the task reaches any terminal state, which stops
    /// the deadline timer early.
    done: CancellationToken,
}

impl WatchTask {
    /// Compile the patterns and build a running task.
    ///
    /// # Errors
    ///
    /// Fails if no patterns were given or any pattern is not valid regex.
    /// Nothing is registered or spawned on failure.
    pub fn new(config: &WatchConfig) -> Result<Self, WatchError> {
        if config.patterns.is_empty() {
            return Err(WatchError::NoPatterns);
        }
        let patterns = config
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|re| (pattern.clone(), re))
                    .map_err(|source| WatchError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: Uuid::new_v4(),
            port: config.port.clone(),
            patterns,
            buffer_lines: config.buffer_lines.max(1),
            timeout: config.timeout,
            started: tokio::time::Instant::now(),
            state: Mutex::new(TaskState {
                status: WatchStatus::Running,
                lines: VecDeque::new(),
                matched_pattern: None,
                finished_seq: None,
                finished_elapsed: None,
            }),
            done: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Feed one line; records it in the bounded output buffer and completes
    /// the task on the first pattern that matches. Patterns are tried in
    /// the order given, so an earlier pattern wins on a multi-match line.
    pub fn deliver(&self, text: &str) {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return;
        }
        state.lines.push_back(text.to_string());
        while state.lines.len() > self.buffer_lines {
            state.lines.pop_front();
        }
        let matched = self
            .patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(pattern, _)| pattern.clone());
        if let Some(pattern) = matched {
            tracing::debug!(id = %self.id, port = self.port, pattern, "Watch pattern matched");
            state.matched_pattern = Some(pattern);
            self.finish(&mut state, WatchStatus::Complete);
        }
    }

    /// Deadline fired; only a still-running task moves to `Timeout`.
    pub fn expire(&self) {
        let mut state = self.lock();
        if state.status == WatchStatus::Running {
            tracing::debug!(id = %self.id, port = self.port, "Watch timed out");
            self.finish(&mut state, WatchStatus::Timeout);
        }
    }

    /// Cancel a running task. Returns false if it already finished.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.status != WatchStatus::Running {
            return false;
        }
        self.finish(&mut state, WatchStatus::Cancelled);
        true
    }

    /// Mark the task failed, used when its port goes away underneath it.
    pub fn fail(&self) {
        let mut state = self.lock();
        if state.status == WatchStatus::Running {
            self.finish(&mut state, WatchStatus::Error);
        }
    }

    #[must_use]
    pub fn status(&self) -> WatchStatus {
        self.lock().status
    }

    pub(super) fn finished_seq(&self) -> Option<u64> {
        self.lock().finished_seq
    }

    #[must_use]
    pub fn snapshot(&self) -> WatchSnapshot {
        let state = self.lock();
        let elapsed = state.finished_elapsed.unwrap_or_else(|| self.started.elapsed());
        WatchSnapshot {
            id: self.id,
            port: self.port.clone(),
            status: state.status,
            output: state.lines.iter().cloned().collect(),
            matched_pattern: state.matched_pattern.clone(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn finish(&self, state: &mut TaskState, status: WatchStatus) {
        state.status = status;
        state.finished_seq = Some(FINISH_SEQ.fetch_add(1, Ordering::Relaxed));
        state.finished_elapsed = Some(self.started.elapsed());
        self.done.cancel();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
