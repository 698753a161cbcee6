//! Background task orchestration.
//!
//! A single batch task runs at a time. It fans work units out over a small
//! worker pool, accumulates counters and a capped log buffer, and exposes a
//! point-in-time status snapshot that pollers read while the task runs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub mod events;
pub mod poller;

pub use events::{ProgressBus, ProgressEvent};
pub use poller::{StatusPoller, StatusSource};

use crate::config::TaskConfig;
use crate::error::{FeedForgeError, ForgeResult};

/// Lifecycle state of the batch task slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskState {
    /// True when no further counter or log changes can occur
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Stopped)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Idle => "idle",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Severity of a task log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One line in the task's log buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub time: String,
    pub level: TaskLogLevel,
    pub message: String,
}

/// Point-in-time snapshot of the running (or last finished) task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Serialized as `status`, the key clients key off of
    #[serde(rename = "status")]
    pub state: TaskState,
    /// Total work units in the batch
    pub total: usize,
    /// Units finished, successfully or not
    pub completed: usize,
    /// Units that produced results
    pub success: usize,
    /// Units that errored
    pub failed: usize,
    /// Articles accumulated across all finished units
    pub total_articles: usize,
    /// Integer percentage, completed over total
    pub progress: u8,
    /// Most recent log lines, oldest first
    pub logs: Vec<TaskLogEntry>,
}

impl TaskStatus {
    pub fn idle() -> Self {
        Self {
            state: TaskState::Idle,
            total: 0,
            completed: 0,
            success: 0,
            failed: 0,
            total_articles: 0,
            progress: 0,
            logs: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// One row of a multi-batch request: a named account group plus its window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTaskSpec {
    pub type_name: String,
    #[serde(default)]
    pub count: usize,
    #[serde(flatten)]
    pub window: TimeWindow,
}

/// Optional publish-time bounds, unix seconds, inclusive
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
}

impl TimeWindow {
    pub fn contains(&self, publish_time: i64) -> bool {
        if let Some(since) = self.since {
            if publish_time < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if publish_time > until {
                return false;
            }
        }
        true
    }
}

/// Result a worker reports for one finished unit
#[derive(Debug, Clone, Default)]
pub struct UnitOutcome {
    pub articles: usize,
}

struct TaskInner {
    status: TaskStatus,
    max_retained_logs: usize,
    returned_logs: usize,
}

impl TaskInner {
    fn push_log(&mut self, level: TaskLogLevel, message: String) {
        self.status.logs.push(TaskLogEntry {
            time: Utc::now().format("%H:%M:%S").to_string(),
            level,
            message,
        });
        let len = self.status.logs.len();
        if len > self.max_retained_logs {
            self.status.logs.drain(..len - self.max_retained_logs);
        }
    }

    fn recompute_progress(&mut self) {
        self.status.progress = if self.status.total > 0 {
            let pct = self.status.completed as f64 / self.status.total as f64 * 100.0;
            pct.round() as u8
        } else {
            0
        };
    }
}

/// Handle workers use to report progress into the shared status
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<Mutex<TaskInner>>,
    stop: Arc<AtomicBool>,
}

impl TaskContext {
    /// True once a stop was requested; workers check this between steps
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn log(&self, level: TaskLogLevel, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.push_log(level, message.into());
    }

    /// Record one finished unit
    pub fn unit_done(&self, outcome: Result<UnitOutcome, String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.status.completed += 1;
        match outcome {
            Ok(result) => {
                inner.status.success += 1;
                inner.status.total_articles += result.articles;
            }
            Err(message) => {
                inner.status.failed += 1;
                inner.push_log(TaskLogLevel::Error, message);
            }
        }
        inner.recompute_progress();
    }
}

/// Owns the single task slot and its worker pool
pub struct TaskManager {
    inner: Arc<Mutex<TaskInner>>,
    stop: Arc<AtomicBool>,
    workers: usize,
}

impl TaskManager {
    pub fn new(config: &TaskConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TaskInner {
                status: TaskStatus::idle(),
                max_retained_logs: config.max_retained_logs,
                returned_logs: config.returned_logs,
            })),
            stop: Arc::new(AtomicBool::new(false)),
            workers: config.workers.max(1),
        }
    }

    /// Snapshot of the current status. The log tail is truncated to the
    /// configured return size; counters are copied as-is.
    pub fn status(&self) -> TaskStatus {
        let inner = self.inner.lock().unwrap();
        let mut status = inner.status.clone();
        let keep = inner.returned_logs;
        let len = status.logs.len();
        if len > keep {
            status.logs.drain(..len - keep);
        }
        status
    }

    /// Request a cooperative stop. Fails when nothing is running.
    pub fn stop(&self) -> ForgeResult<()> {
        let inner = self.inner.lock().unwrap();
        if inner.status.state != TaskState::Running {
            return Err(FeedForgeError::NoRunningTask);
        }
        drop(inner);

        self.stop.store(true, Ordering::SeqCst);
        info!("Stop requested for running task");
        Ok(())
    }

    /// Start a batch of work units. Exactly one task runs at a time; a second
    /// start while running is rejected without touching the live status.
    ///
    /// Each unit is executed by `work` under a pool of `workers` permits. The
    /// closure receives the unit and a [`TaskContext`] and must report its
    /// outcome itself (see [`TaskContext::unit_done`]) or return it.
    pub fn start<U, F, Fut>(&self, units: Vec<U>, label: String, work: F) -> ForgeResult<()>
    where
        U: Send + 'static,
        F: Fn(U, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UnitOutcome, String>> + Send + 'static,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status.state == TaskState::Running {
                return Err(FeedForgeError::TaskAlreadyRunning);
            }

            // Fresh run: reset counters and logs
            inner.status = TaskStatus {
                state: TaskState::Running,
                total: units.len(),
                completed: 0,
                success: 0,
                failed: 0,
                total_articles: 0,
                progress: 0,
                logs: Vec::new(),
            };
            inner.push_log(
                TaskLogLevel::Info,
                format!("{}: {} work units queued", label, units.len()),
            );
        }
        self.stop.store(false, Ordering::SeqCst);

        let context = TaskContext {
            inner: Arc::clone(&self.inner),
            stop: Arc::clone(&self.stop),
        };
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let work = Arc::new(work);
        let inner = Arc::clone(&self.inner);
        let stop = Arc::clone(&self.stop);

        tokio::spawn(async move {
            let mut handles = Vec::with_capacity(units.len());

            for unit in units {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                if stop.load(Ordering::SeqCst) {
                    // Unstarted units are abandoned, not counted as completed
                    drop(permit);
                    break;
                }

                let work = Arc::clone(&work);
                let ctx = context.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = work(unit, ctx.clone()).await;
                    ctx.unit_done(outcome);
                    drop(permit);
                }));
            }

            for handle in handles {
                if let Err(err) = handle.await {
                    warn!("Task worker panicked: {}", err);
                    context.unit_done(Err("worker panicked".to_string()));
                }
            }

            // All started units are done; settle the terminal state once
            let mut inner = inner.lock().unwrap();
            let status = &mut inner.status;
            let final_state = if stop.load(Ordering::SeqCst) {
                TaskState::Stopped
            } else if status.total > 0 && status.failed == status.total {
                TaskState::Failed
            } else {
                TaskState::Completed
            };
            status.state = final_state;
            let summary = format!(
                "Task finished ({}): {}/{} units, {} articles",
                final_state, status.completed, status.total, status.total_articles
            );
            let level = match final_state {
                TaskState::Failed => TaskLogLevel::Error,
                TaskState::Stopped => TaskLogLevel::Warning,
                _ => TaskLogLevel::Success,
            };
            inner.push_log(level, summary);
            info!("Task finished: {}", final_state);
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(workers: usize) -> TaskManager {
        TaskManager::new(&TaskConfig {
            workers,
            max_retained_logs: 500,
            returned_logs: 100,
        })
    }

    async fn wait_terminal(manager: &TaskManager) -> TaskStatus {
        for _ in 0..200 {
            let status = manager.status();
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task did not reach a terminal state");
    }

    #[tokio::test]
    async fn test_counters_and_progress() {
        let manager = manager(2);
        manager
            .start(vec![1u32, 2, 3, 4], "collect".to_string(), |n, _ctx| async move {
                if n % 2 == 0 {
                    Ok(UnitOutcome { articles: 5 })
                } else {
                    Err(format!("unit {} failed", n))
                }
            })
            .unwrap();

        let status = wait_terminal(&manager).await;
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.total, 4);
        assert_eq!(status.completed, 4);
        assert_eq!(status.success, 2);
        assert_eq!(status.failed, 2);
        assert_eq!(status.total_articles, 10);
        assert_eq!(status.progress, 100);
        assert_eq!(status.success + status.failed, status.completed);
    }

    #[tokio::test]
    async fn test_all_failed_marks_failed() {
        let manager = manager(2);
        manager
            .start(vec![1u32, 2], "collect".to_string(), |n, _ctx| async move {
                Err(format!("unit {} failed", n))
            })
            .unwrap();

        let status = wait_terminal(&manager).await;
        assert_eq!(status.state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_running() {
        let manager = manager(1);
        manager
            .start(vec![()], "collect".to_string(), |_, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(UnitOutcome::default())
            })
            .unwrap();

        let err = manager
            .start(vec![()], "collect".to_string(), |_, _ctx| async move {
                Ok(UnitOutcome::default())
            })
            .unwrap_err();
        assert!(matches!(err, FeedForgeError::TaskAlreadyRunning));

        // The live run keeps its counters
        let status = manager.status();
        assert_eq!(status.total, 1);

        let status = wait_terminal(&manager).await;
        assert_eq!(status.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_stop_is_cooperative_and_terminal() {
        let manager = manager(1);
        manager
            .start(vec![1u32, 2, 3, 4, 5], "collect".to_string(), |_, ctx| async move {
                for _ in 0..50 {
                    if ctx.should_stop() {
                        return Err("stopped".to_string());
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(UnitOutcome::default())
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.stop().unwrap();

        let status = wait_terminal(&manager).await;
        assert_eq!(status.state, TaskState::Stopped);
        // Abandoned units stay uncounted
        assert!(status.completed < status.total);
    }

    #[tokio::test]
    async fn test_stop_without_running_task() {
        let manager = manager(1);
        let err = manager.stop().unwrap_err();
        assert!(matches!(err, FeedForgeError::NoRunningTask));
    }

    #[tokio::test]
    async fn test_log_cap_and_return_tail() {
        let manager = TaskManager::new(&TaskConfig {
            workers: 1,
            max_retained_logs: 10,
            returned_logs: 4,
        });
        manager
            .start(vec![()], "collect".to_string(), |_, ctx| async move {
                for i in 0..50 {
                    ctx.log(TaskLogLevel::Info, format!("line {}", i));
                }
                Ok(UnitOutcome::default())
            })
            .unwrap();

        let status = wait_terminal(&manager).await;
        assert_eq!(status.logs.len(), 4);
        // The tail holds the most recent lines
        assert_eq!(status.logs.last().unwrap().message.contains("finished"), true);
    }

    #[tokio::test]
    async fn test_progress_rounding() {
        let mut inner = TaskInner {
            status: TaskStatus::idle(),
            max_retained_logs: 500,
            returned_logs: 100,
        };
        inner.status.total = 3;
        inner.status.completed = 1;
        inner.recompute_progress();
        assert_eq!(inner.status.progress, 33);
        inner.status.completed = 2;
        inner.recompute_progress();
        assert_eq!(inner.status.progress, 67);
        inner.status.total = 0;
        inner.recompute_progress();
        assert_eq!(inner.status.progress, 0);
    }

    #[test]
    fn test_status_wire_shape() {
        let json = serde_json::to_value(TaskStatus::idle()).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json.get("state").is_none());

        let parsed: TaskStatus =
            serde_json::from_value(serde_json::json!({
                "status": "running",
                "total": 2, "completed": 1, "success": 1, "failed": 0,
                "total_articles": 3, "progress": 50, "logs": []
            }))
            .unwrap();
        assert_eq!(parsed.state, TaskState::Running);
    }

    #[test]
    fn test_time_window() {
        let window = TimeWindow {
            since: Some(100),
            until: Some(200),
        };
        assert!(!window.contains(99));
        assert!(window.contains(100));
        assert!(window.contains(200));
        assert!(!window.contains(201));
        assert!(TimeWindow::default().contains(i64::MIN));
    }
}
