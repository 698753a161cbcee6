//! Client-side status polling.
//!
//! Consumers that cannot hold a live connection to the task slot (the CLI,
//! a reattaching UI) poll the status snapshot instead. The poller fetches
//! once immediately, then at a fixed interval, strictly sequentially: the
//! next poll is scheduled only after the previous fetch resolved. A fetch
//! failure keeps the last good snapshot; polling ends when the snapshot
//! reaches a terminal state. Dropping the poller cancels it.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::TaskStatus;
use crate::error::ForgeResult;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Consecutive failed polls tolerated before any snapshot has been seen
pub const MAX_STARTUP_FAILURES: usize = 3;

/// Anything that can produce a status snapshot on demand
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> ForgeResult<TaskStatus>;
}

/// Sequential fixed-interval poller over a [`StatusSource`]
pub struct StatusPoller<S: StatusSource> {
    source: S,
    interval: Duration,
    last: Option<TaskStatus>,
    consecutive_failures: usize,
}

impl<S: StatusSource> StatusPoller<S> {
    pub fn new(source: S) -> Self {
        Self::with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(source: S, interval: Duration) -> Self {
        Self {
            source,
            interval,
            last: None,
            consecutive_failures: 0,
        }
    }

    /// Most recent successfully fetched snapshot
    pub fn last(&self) -> Option<&TaskStatus> {
        self.last.as_ref()
    }

    /// Perform one poll. On failure the previous snapshot is retained and
    /// returned. The first call is the reattachment poll: it reflects
    /// whatever state the task slot is already in.
    pub async fn poll_once(&mut self) -> Option<&TaskStatus> {
        match self.source.fetch().await {
            Ok(status) => {
                self.consecutive_failures = 0;
                self.last = Some(status);
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    "Status poll failed ({} in a row): {}",
                    self.consecutive_failures, err
                );
            }
        }
        self.last.as_ref()
    }

    /// Poll until the status reaches a terminal state (or turns out idle),
    /// invoking `on_update` after every successful fetch. Returns the final
    /// snapshot. The interval is measured between fetch completions, so a
    /// slow source never causes overlapping requests.
    ///
    /// Gives up with `None` when no snapshot at all arrives within
    /// [`MAX_STARTUP_FAILURES`] consecutive attempts.
    pub async fn run<F>(mut self, mut on_update: F) -> Option<TaskStatus>
    where
        F: FnMut(&TaskStatus),
    {
        loop {
            if let Some(status) = self.poll_once().await {
                on_update(status);
                if !status.is_running() {
                    debug!("Polling finished in state {}", status.state);
                    return self.last;
                }
            } else if self.consecutive_failures >= MAX_STARTUP_FAILURES {
                warn!("Giving up: no status received after {} attempts", self.consecutive_failures);
                return None;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedForgeError;
    use crate::task::TaskState;
    use std::sync::Mutex;

    /// Plays back a fixed script of fetch results
    struct ScriptedSource {
        script: Mutex<Vec<ForgeResult<TaskStatus>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<ForgeResult<TaskStatus>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch(&self) -> ForgeResult<TaskStatus> {
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(TaskStatus::idle()))
        }
    }

    fn running(completed: usize, total: usize) -> TaskStatus {
        TaskStatus {
            state: TaskState::Running,
            total,
            completed,
            success: completed,
            failed: 0,
            total_articles: 0,
            progress: (completed * 100 / total.max(1)) as u8,
            logs: Vec::new(),
        }
    }

    fn completed(total: usize) -> TaskStatus {
        let mut status = running(total, total);
        status.state = TaskState::Completed;
        status
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_poll_then_interval() {
        let source = ScriptedSource::new(vec![
            Ok(running(0, 2)),
            Ok(running(1, 2)),
            Ok(completed(2)),
        ]);
        let poller = StatusPoller::new(source);

        let seen = Mutex::new(Vec::new());
        let final_status = poller
            .run(|status| seen.lock().unwrap().push(status.completed))
            .await
            .unwrap();

        assert_eq!(final_status.state, TaskState::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retains_last_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(running(1, 3)),
            Err(FeedForgeError::network("connection refused")),
            Ok(completed(3)),
        ]);
        let mut poller = StatusPoller::new(source);

        poller.poll_once().await;
        assert_eq!(poller.last().unwrap().completed, 1);

        // Failed poll keeps the previous snapshot
        poller.poll_once().await;
        assert_eq!(poller.last().unwrap().completed, 1);
        assert_eq!(poller.last().unwrap().state, TaskState::Running);

        poller.poll_once().await;
        assert_eq!(poller.last().unwrap().state, TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattachment_sees_terminal_immediately() {
        let source = ScriptedSource::new(vec![Ok(completed(5))]);
        let poller = StatusPoller::new(source);

        let mut updates = 0;
        let final_status = poller.run(|_| updates += 1).await.unwrap();

        // A task that already finished terminates polling on the first fetch
        assert_eq!(updates, 1);
        assert_eq!(final_status.state, TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_before_first_snapshot_keeps_polling() {
        let source = ScriptedSource::new(vec![
            Err(FeedForgeError::network("boom")),
            Ok(completed(1)),
        ]);
        let poller = StatusPoller::new(source);

        let final_status = poller.run(|_| {}).await.unwrap();
        assert_eq!(final_status.state, TaskState::Completed);
    }
}
