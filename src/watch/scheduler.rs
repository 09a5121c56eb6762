//! Registry of live and recently finished watch tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use super::error::WatchError;
use super::task::{WatchSnapshot, WatchTask};

/// Finished tasks kept queryable before the sweep drops them.
const RETAINED_TERMINAL_TASKS: usize = 10;

/// Owns every watch task, fans incoming lines out to them, and retains a
/// bounded tail of finished tasks so their results stay queryable.
pub struct WatchScheduler {
    tasks: Mutex<HashMap<Uuid, Arc<WatchTask>>>,
    retention: usize,
}

impl Default for WatchScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            retention: RETAINED_TERMINAL_TASKS,
        }
    }

    /// Register a task and spawn its deadline timer. The timer stops early
    /// when the task reaches a terminal state through any other path.
    pub fn register(&self, task: WatchTask) -> Uuid {
        let id = task.id();
        let task = Arc::new(task);
        tracing::info!(id = %id, port = task.port(), timeout = ?task.timeout(), "Watch registered");

        let done = task.done_token();
        let timeout = task.timeout();
        let timer_task = Arc::clone(&task);
        tokio::spawn(async move {
            tokio::select! {
                () = done.cancelled() => {}
                () = tokio::time::sleep(timeout) => timer_task.expire(),
            }
        });

        let mut tasks = self.lock();
        tasks.insert(id, task);
        Self::sweep(&mut tasks, self.retention);
        id
    }

    /// Fan one received line out to every running task on `port`.
    pub fn deliver(&self, port: &str, text: &str) {
        let targets: Vec<Arc<WatchTask>> = self
            .lock()
            .values()
            .filter(|task| task.port() == port)
            .cloned()
            .collect();
        for task in targets {
            task.deliver(text);
        }
    }

    /// Snapshot a task's current state.
    ///
    /// # Errors
    ///
    /// Fails if the id is unknown or the task was already swept.
    pub fn check_status(&self, id: Uuid) -> Result<WatchSnapshot, WatchError> {
        self.lock()
            .get(&id)
            .map(|task| task.snapshot())
            .ok_or(WatchError::TaskNotFound(id))
    }

    /// Cancel a task. Returns whether it was still running; cancelling a
    /// finished or unknown task returns false rather than an error.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut tasks = self.lock();
        let cancelled = tasks.get(&id).is_some_and(|task| task.cancel());
        if cancelled {
            tracing::info!(id = %id, "Watch cancelled");
            Self::sweep(&mut tasks, self.retention);
        }
        cancelled
    }

    /// Fail every running task on `port`, used when the port is
    /// disconnected out from under them.
    pub fn fail_port(&self, port: &str) {
        let mut tasks = self.lock();
        for task in tasks.values() {
            if task.port() == port {
                task.fail();
            }
        }
        Self::sweep(&mut tasks, self.retention);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all but the most recently finished terminal tasks.
    fn sweep(tasks: &mut HashMap<Uuid, Arc<WatchTask>>, retention: usize) {
        let mut terminal: Vec<(u64, Uuid)> = tasks
            .iter()
            .filter_map(|(id, task)| task.finished_seq().map(|seq| (seq, *id)))
            .collect();
        if terminal.len() <= retention {
            return;
        }
        terminal.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in terminal.drain(retention..) {
            tasks.remove(&id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<WatchTask>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::task::{WatchConfig, WatchStatus, DEFAULT_BUFFER_LINES};
    use super::*;

    fn config(port: &str, patterns: &[&str], timeout: Duration) -> WatchConfig {
        WatchConfig {
            port: port.to_string(),
            patterns: patterns.iter().map(ToString::to_string).collect(),
            timeout,
            buffer_lines: DEFAULT_BUFFER_LINES,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_routes_by_port() {
        let scheduler = WatchScheduler::new();
        let a = scheduler.register(
            WatchTask::new(&config("COM1", &["go"], Duration::from_secs(60))).unwrap(),
        );
        let b = scheduler.register(
            WatchTask::new(&config("COM2", &["go"], Duration::from_secs(60))).unwrap(),
        );

        scheduler.deliver("COM1", "go");

        assert_eq!(
            scheduler.check_status(a).unwrap().status,
            WatchStatus::Complete
        );
        assert_eq!(
            scheduler.check_status(b).unwrap().status,
            WatchStatus::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out_running_task() {
        let scheduler = WatchScheduler::new();
        let id = scheduler.register(
            WatchTask::new(&config("COM1", &["never"], Duration::from_millis(100))).unwrap(),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(
            scheduler.check_status(id).unwrap().status,
            WatchStatus::Timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_beats_simultaneous_deadline() {
        let scheduler = WatchScheduler::new();
        let id = scheduler.register(
            WatchTask::new(&config("COM1", &["hit"], Duration::from_millis(100))).unwrap(),
        );

        scheduler.deliver("COM1", "hit");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            scheduler.check_status(id).unwrap().status,
            WatchStatus::Complete
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_task_is_false() {
        let scheduler = WatchScheduler::new();
        assert!(!scheduler.cancel(Uuid::new_v4()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_port_errors_running_tasks() {
        let scheduler = WatchScheduler::new();
        let id = scheduler.register(
            WatchTask::new(&config("COM1", &["never"], Duration::from_secs(60))).unwrap(),
        );

        scheduler.fail_port("COM1");

        assert_eq!(
            scheduler.check_status(id).unwrap().status,
            WatchStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_bounds_terminal_tasks() {
        let scheduler = WatchScheduler::new();
        let mut ids = Vec::new();
        for _ in 0..12 {
            let id = scheduler.register(
                WatchTask::new(&config("COM1", &["never"], Duration::from_secs(60))).unwrap(),
            );
            scheduler.cancel(id);
            ids.push(id);
        }

        assert_eq!(scheduler.len(), RETAINED_TERMINAL_TASKS);
        // The oldest finished tasks were swept, the newest remain.
        assert!(scheduler.check_status(ids[0]).is_err());
        assert!(scheduler.check_status(ids[11]).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_tasks_never_swept() {
        let scheduler = WatchScheduler::new();
        let running = scheduler.register(
            WatchTask::new(&config("COM9", &["never"], Duration::from_secs(600))).unwrap(),
        );
        for _ in 0..15 {
            let id = scheduler.register(
                WatchTask::new(&config("COM1", &["never"], Duration::from_secs(60))).unwrap(),
            );
            scheduler.cancel(id);
        }

        let snap = scheduler.check_status(running).unwrap();
        assert_eq!(snap.status, WatchStatus::Running);
    }
}
