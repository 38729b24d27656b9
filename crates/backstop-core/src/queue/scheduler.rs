//! RetryScheduler - delayed re-admission of failed jobs.
//!
//! A single loop task owns a min-heap ordered by due time. The loop sleeps
//! until the earliest entry is due (or a new entry is scheduled) and then
//! runs its action. Actions run one at a time and must be short: they only
//! re-admit a job, they never execute it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::pool::WorkItem;
use crate::domain::JobId;
use crate::error::QueueError;

struct ScheduledAction {
    run_at: Instant,
    /// Tie-breaker: equal due times fire in scheduling order.
    seq: u64,
    job_id: JobId,
    action: WorkItem,
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    // BinaryHeap は max-heap なので逆順にして最早のものを先頭にする
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct SchedulerState {
    entries: BinaryHeap<ScheduledAction>,
    next_seq: u64,
    stopped: bool,
}

pub struct RetryScheduler {
    state: Arc<Mutex<SchedulerState>>,
    notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

enum Step {
    Fire(ScheduledAction),
    SleepUntil(Instant),
    Idle,
}

impl RetryScheduler {
    /// Start the scheduler loop. Must be called inside a tokio runtime.
    pub fn start() -> Self {
        let state = Arc::new(Mutex::new(SchedulerState::default()));
        let notify = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler_loop(
            Arc::clone(&state),
            Arc::clone(&notify),
            shutdown_rx,
        ));
        Self {
            state,
            notify,
            shutdown_tx,
            join: Mutex::new(Some(join)),
        }
    }

    /// Run `action` after `delay`. Fails once the scheduler is stopped.
    pub async fn schedule<F>(&self, job_id: JobId, delay: Duration, action: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.state.lock().await;
            if state.stopped {
                return Err(QueueError::SchedulerStopped);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(ScheduledAction {
                run_at: Instant::now() + delay,
                seq,
                job_id,
                action: Box::pin(action),
            });
        }
        debug!(%job_id, delay_ms = delay.as_millis() as u64, "retry scheduled");
        self.notify.notify_one();
        Ok(())
    }

    /// Entries waiting for their due time.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Stop the loop. Pending entries are discarded; the count is returned.
    /// An action that is already running finishes first.
    pub async fn shutdown(&self) -> usize {
        let abandoned = {
            let mut state = self.state.lock().await;
            state.stopped = true;
            let abandoned = state.entries.len();
            state.entries.clear();
            abandoned
        };
        let _ = self.shutdown_tx.send(true);
        if let Some(join) = self.join.lock().await.take() {
            let _ = join.await;
            if abandoned > 0 {
                warn!(abandoned, "retry scheduler stopped with pending retries");
            } else {
                info!("retry scheduler stopped");
            }
        }
        abandoned
    }
}

async fn scheduler_loop(
    state: Arc<Mutex<SchedulerState>>,
    notify: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let step = {
            let mut state = state.lock().await;
            if state.stopped {
                break;
            }
            let due = state.entries.peek().map(|entry| entry.run_at);
            match due {
                Some(run_at) if run_at <= Instant::now() => match state.entries.pop() {
                    Some(entry) => Step::Fire(entry),
                    None => Step::Idle,
                },
                Some(run_at) => Step::SleepUntil(run_at),
                None => Step::Idle,
            }
        };

        match step {
            Step::Fire(entry) => {
                debug!(job_id = %entry.job_id, "retry due");
                entry.action.await;
            }
            Step::SleepUntil(run_at) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep_until(run_at) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Step::Idle => {
                tokio::select! {
                    _ = notify.notified() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
