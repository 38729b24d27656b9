//! Bounded worker pools.
//!
//! A pool is `workers` tasks pulling from a FIFO of at most `queue_depth`
//! pending items. Admission never blocks: an item is accepted while a worker
//! is idle or a queue slot is free, and rejected with `QueueSaturated`
//! otherwise. Accepted items are never dropped, except by an `Abandon`
//! shutdown.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::QueueError;

/// A unit of work handed to a pool or the retry scheduler.
pub type WorkItem = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The permit travels with the item and frees its slot when the item finishes.
type Slot = (OwnedSemaphorePermit, WorkItem);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Normal,
    Compensation,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Normal => f.write_str("normal"),
            PoolKind::Compensation => f.write_str("compensation"),
        }
    }
}

/// What happens to queued (not yet started) items on shutdown.
/// In-flight items always run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Run everything already accepted, then stop.
    #[default]
    Drain,
    /// Stop after the in-flight items; queued items are dropped.
    Abandon,
}

pub struct WorkerPool {
    kind: PoolKind,
    capacity: usize,
    /// workers + queue_depth permits; one per accepted, unfinished item.
    admission: Arc<Semaphore>,
    /// `None` once shut down. Dropping the sender lets workers drain and exit.
    sender: RwLock<Option<mpsc::Sender<Slot>>>,
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` workers. Must be called inside a tokio runtime.
    pub fn spawn(kind: PoolKind, workers: usize, queue_depth: usize) -> Self {
        let capacity = workers + queue_depth;
        let (tx, rx) = mpsc::channel::<Slot>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let shutdown_rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(kind, worker_id, rx, shutdown_rx)));
        }
        info!(pool = %kind, workers, queue_depth, "worker pool started");

        Self {
            kind,
            capacity,
            admission: Arc::new(Semaphore::new(capacity)),
            sender: RwLock::new(Some(tx)),
            shutdown_tx,
            joins: Mutex::new(joins),
        }
    }

    /// Accepted items that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    /// Hand `work` to the pool, or fail fast.
    pub async fn try_submit<F>(&self, work: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.read().await;
        let Some(tx) = sender.as_ref() else {
            return Err(QueueError::PoolClosed(self.kind));
        };
        let permit = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| QueueError::QueueSaturated(self.kind))?;
        tx.try_send((permit, Box::pin(work))).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::QueueSaturated(self.kind),
            TrySendError::Closed(_) => QueueError::PoolClosed(self.kind),
        })
    }

    /// Stop accepting work and wait for the workers to exit.
    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.sender.write().await.take();
        if mode == ShutdownMode::Abandon {
            // ignore send error: workers may already be gone
            let _ = self.shutdown_tx.send(true);
        }
        let joins = std::mem::take(&mut *self.joins.lock().await);
        if joins.is_empty() {
            return;
        }
        for join in joins {
            let _ = join.await;
        }
        info!(pool = %self.kind, ?mode, "worker pool stopped");
    }
}

async fn worker_loop(
    pool: PoolKind,
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Slot>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(%pool, worker_id, "worker started");
    loop {
        let slot = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                slot = rx.recv() => slot,
            }
        };

        // sender dropped and queue drained
        let Some((permit, work)) = slot else {
            break;
        };
        work.await;
        drop(permit);
    }
    debug!(%pool, worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Blocks every submitted item until the gate is opened.
    fn gated(gate: &Arc<Semaphore>, done: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let gate = Arc::clone(gate);
        let done = Arc::clone(done);
        async move {
            let _permit = gate.acquire().await;
            done.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(done: &AtomicUsize, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while done.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("items did not finish in time");
    }

    #[tokio::test]
    async fn rejects_beyond_workers_plus_queue_depth() {
        let pool = WorkerPool::spawn(PoolKind::Normal, 2, 3);
        let gate = Arc::new(Semaphore::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            pool.try_submit(gated(&gate, &done)).await.unwrap();
        }
        let err = pool.try_submit(gated(&gate, &done)).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueSaturated(PoolKind::Normal)));
        assert_eq!(pool.in_flight(), 5);

        gate.add_permits(100);
        wait_for(&done, 5).await;

        // slots are released once items finish
        pool.try_submit(gated(&gate, &done)).await.unwrap();
        wait_for(&done, 6).await;
        pool.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test]
    async fn drain_runs_queued_items() {
        let pool = WorkerPool::spawn(PoolKind::Compensation, 1, 4);
        let gate = Arc::new(Semaphore::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            pool.try_submit(gated(&gate, &done)).await.unwrap();
        }

        gate.add_permits(100);
        pool.shutdown(ShutdownMode::Drain).await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn abandon_drops_queued_items() {
        let pool = Arc::new(WorkerPool::spawn(PoolKind::Normal, 1, 4));
        let gate = Arc::new(Semaphore::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            pool.try_submit(gated(&gate, &done)).await.unwrap();
        }
        // let the worker pick up the first item
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.shutdown(ShutdownMode::Abandon).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(100);
        shutdown.await.unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = WorkerPool::spawn(PoolKind::Normal, 1, 1);
        pool.shutdown(ShutdownMode::Drain).await;
        let err = pool.try_submit(async {}).await.unwrap_err();
        assert!(matches!(err, QueueError::PoolClosed(PoolKind::Normal)));
        // second shutdown is a no-op
        pool.shutdown(ShutdownMode::Drain).await;
    }
}
