//! JobOrchestrator - submission, execution, retry and compensation.
//!
//! # フロー
//! 1. `submit`: idempotency claim -> persist QUEUED -> normal pool
//! 2. attempt (normal worker): RUNNING -> handler.execute
//!    - ok: SUCCEEDED
//!    - err: attempts += 1 -> Decider
//!      - Retry: RETRY_SCHEDULED -> scheduler -> QUEUED -> normal pool
//!      - Compensate: FAILED -> compensation pool
//! 3. compensation (compensation worker): handler.compensate
//!    - ok: COMPENSATED
//!    - err: COMPENSATION_FAILED
//!
//! The orchestrator is the only writer of job records. A job is owned by at
//! most one worker or scheduler entry at a time, so each transition is a
//! plain get / mutate / put against the store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{Decider, Decision, DecisionRecord, Job, JobId, JobStatus, JobStatusView, JobType};
use crate::error::QueueError;
use crate::ports::{Clock, IdGenerator, JobStore};
use crate::queue::{
    Claim, IdempotencyIndex, PoolKind, RetryPolicy, RetryScheduler, ShutdownMode, WorkItem,
    WorkerPool,
};
use crate::typed::{HandlerRegistry, LastKnownState};

/// Collaborators injected by the builder.
pub(crate) struct Components {
    pub store: Arc<dyn JobStore>,
    pub registry: HandlerRegistry,
    pub decider: Arc<dyn Decider>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    idempotency: IdempotencyIndex,
    normal: WorkerPool,
    compensation: WorkerPool,
    scheduler: RetryScheduler,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    decisions: DashMap<JobId, Vec<DecisionRecord>>,
    /// Backoff for re-entering a saturated pool.
    requeue_policy: RetryPolicy,
    requeue_limit: u32,
    shutdown_mode: ShutdownMode,
}

/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    /// Spawn the pools and the scheduler. Must be called inside a tokio runtime.
    pub(crate) fn start(config: &QueueConfig, components: Components) -> Self {
        let normal = WorkerPool::spawn(
            PoolKind::Normal,
            config.normal_pool.workers,
            config.normal_pool.queue_depth,
        );
        let compensation = WorkerPool::spawn(
            PoolKind::Compensation,
            config.compensation_pool.workers,
            config.compensation_pool.queue_depth,
        );
        Self {
            inner: Arc::new(Inner {
                store: components.store,
                registry: components.registry,
                idempotency: IdempotencyIndex::new(),
                normal,
                compensation,
                scheduler: RetryScheduler::start(),
                decider: components.decider,
                clock: components.clock,
                ids: components.ids,
                decisions: DashMap::new(),
                requeue_policy: RetryPolicy::from_config(&config.retry),
                requeue_limit: config.retry.requeue_limit,
                shutdown_mode: config.shutdown,
            }),
        }
    }

    // ---- public operations ----

    /// Submit a job.
    ///
    /// With an idempotency key that is already mapped, the existing job is
    /// returned unchanged and nothing is dispatched. Otherwise a QUEUED job is
    /// persisted and handed to the normal pool.
    ///
    /// A mapped key wins over every other check: the existing job is returned
    /// even when `job_type` differs or is unknown.
    ///
    /// # Errors
    /// - `UnknownJobType`: nothing is persisted.
    /// - `QueueSaturated`: the job stays persisted in QUEUED and never runs.
    pub async fn submit(
        &self,
        job_type: impl Into<JobType>,
        payload: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<Job, QueueError> {
        let job_type = job_type.into();
        if let Some(job_id) = idempotency_key.and_then(|key| self.inner.idempotency.lookup(key)) {
            debug!(%job_id, ?idempotency_key, "duplicate submission");
            return self.snapshot(job_id);
        }
        if !self.inner.registry.contains(&job_type) {
            warn!(%job_type, "submission rejected: unknown job type");
            return Err(QueueError::UnknownJobType(job_type));
        }

        let job_id = match idempotency_key {
            Some(key) => {
                let claim = self
                    .inner
                    .idempotency
                    .claim_with(key, || self.create_job(job_type.clone(), payload, Some(key)));
                match claim {
                    Claim::Existing(job_id) => {
                        debug!(%job_id, idempotency_key = key, "duplicate submission");
                        return self.snapshot(job_id);
                    }
                    Claim::Created(job_id) => job_id,
                }
            }
            None => self.create_job(job_type.clone(), payload, None),
        };

        if let Err(e) = self.inner.normal.try_submit(self.attempt_item(job_id)).await {
            warn!(
                %job_id,
                %job_type,
                in_flight = self.inner.normal.in_flight(),
                error = %e,
                "submission rejected"
            );
            return Err(e);
        }
        info!(%job_id, %job_type, "job submitted");
        self.snapshot(job_id)
    }

    /// Best-known snapshot. Never waits for progress.
    pub fn get_status(&self, job_id: JobId) -> Result<JobStatusView, QueueError> {
        self.snapshot(job_id).map(|job| job.status_view())
    }

    /// Retry/compensate decisions taken for a job, oldest first.
    pub fn decisions(&self, job_id: JobId) -> Vec<DecisionRecord> {
        self.inner
            .decisions
            .get(&job_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Stop the scheduler, then the normal pool, then the compensation pool.
    /// Pending retries are abandoned; pools honour the configured mode.
    pub async fn shutdown(&self) {
        let mode = self.inner.shutdown_mode;
        info!(?mode, "shutting down");
        let abandoned = self.inner.scheduler.shutdown().await;
        self.inner.normal.shutdown(mode).await;
        self.inner.compensation.shutdown(mode).await;
        info!(abandoned_retries = abandoned, "shutdown complete");
    }

    // ---- work items ----

    fn attempt_item(&self, job_id: JobId) -> WorkItem {
        let this = self.clone();
        Box::pin(async move { this.run_attempt(job_id).await })
    }

    fn readmit_item(&self, job_id: JobId, requeues: u32) -> WorkItem {
        let this = self.clone();
        Box::pin(async move { this.readmit(job_id, requeues).await })
    }

    fn compensation_item(&self, job_id: JobId) -> WorkItem {
        let this = self.clone();
        Box::pin(async move { this.run_compensation(job_id).await })
    }

    fn redispatch_compensation_item(&self, job_id: JobId, requeues: u32) -> WorkItem {
        let this = self.clone();
        Box::pin(async move { this.dispatch_compensation(job_id, requeues).await })
    }

    // ---- normal path ----

    /// Runs inside the idempotency shard lock; touches only the store.
    fn create_job(&self, job_type: JobType, payload: serde_json::Value, key: Option<&str>) -> JobId {
        let job_id = self.inner.ids.generate_job_id();
        self.inner
            .store
            .put(Job::new(job_id, job_type, payload, key.map(str::to_string)));
        job_id
    }

    fn snapshot(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.inner.store.get(job_id).ok_or(QueueError::NotFound(job_id))
    }

    async fn run_attempt(self, job_id: JobId) {
        let Some(mut job) = self.inner.store.get(job_id) else {
            error!(%job_id, "admitted job is missing from the store");
            return;
        };
        let now = self.inner.clock.now();
        if let Err(e) = job.start_attempt(now) {
            error!(%job_id, error = %e, "cannot start attempt");
            return;
        }
        self.inner.store.put(job.clone());

        let handler = match self.inner.registry.get(job.job_type()) {
            Ok(handler) => handler,
            Err(e) => {
                // registry is frozen after build; reaching this is a wiring bug
                error!(%job_id, job_type = %job.job_type(), error = %e, "handler lookup failed");
                job.record_failure(e.to_string());
                if let Err(e) = job.mark_failed() {
                    error!(%job_id, error = %e, "cannot mark failed");
                    return;
                }
                self.inner.store.put(job);
                self.finish_compensation(job_id, Err("handler unavailable".to_string()));
                return;
            }
        };

        let attempt = job.attempts() + 1;
        info!(%job_id, job_type = %job.job_type(), attempt, "job started");
        let payload = job.payload().clone();
        let joined = tokio::spawn(async move { handler.execute(&payload).await }).await;
        let outcome = match joined {
            Ok(result) => result.map_err(|e| e.message().to_string()),
            Err(e) => Err(join_failure(e)),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = job.mark_succeeded(self.inner.clock.now()) {
                    error!(%job_id, error = %e, "cannot mark succeeded");
                    return;
                }
                self.inner.store.put(job);
                info!(%job_id, attempt, "job succeeded");
            }
            Err(message) => self.handle_failure(job, message).await,
        }
    }

    async fn handle_failure(&self, mut job: Job, message: String) {
        let job_id = job.job_id();
        job.record_failure(message.clone());
        let decision = self.inner.decider.decide(&job);
        self.record_decision(&job, decision.clone());

        match decision {
            Decision::Retry { delay, .. } => {
                if let Err(e) = job.schedule_retry() {
                    error!(%job_id, error = %e, "cannot schedule retry");
                    return;
                }
                let attempts = job.attempts();
                self.inner.store.put(job);
                warn!(
                    %job_id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "attempt failed, retry scheduled"
                );
                self.arm_retry(job_id, delay, 0).await;
            }
            Decision::Compensate { reason } => {
                error!(%job_id, attempts = job.attempts(), error = %message, %reason, "attempts exhausted");
                self.fail_and_compensate(job).await;
            }
        }
    }

    fn record_decision(&self, job: &Job, decision: Decision) {
        let record = DecisionRecord::new(job, decision, self.inner.clock.now());
        self.inner
            .decisions
            .entry(job.job_id())
            .or_default()
            .push(record);
    }

    async fn arm_retry(&self, job_id: JobId, delay: Duration, requeues: u32) {
        let item = self.readmit_item(job_id, requeues);
        if let Err(e) = self.inner.scheduler.schedule(job_id, delay, item).await {
            // shutting down; the job keeps its RETRY_SCHEDULED record
            warn!(%job_id, error = %e, "retry dropped");
        }
    }

    /// Scheduler callback: put a RETRY_SCHEDULED job back on the normal pool.
    ///
    /// A saturated pool sends the retry back to the scheduler with a growing
    /// delay, at most `requeue_limit` times. After that the retry is dropped and
    /// the job stays RETRY_SCHEDULED; saturation never triggers compensation.
    async fn readmit(self, job_id: JobId, requeues: u32) {
        let Some(scheduled) = self.inner.store.get(job_id) else {
            error!(%job_id, "scheduled job is missing from the store");
            return;
        };
        let mut job = scheduled.clone();
        if let Err(e) = job.requeue() {
            error!(%job_id, error = %e, "cannot requeue");
            return;
        }
        self.inner.store.put(job);

        match self.inner.normal.try_submit(self.attempt_item(job_id)).await {
            Ok(()) => debug!(%job_id, "retry admitted"),
            Err(QueueError::QueueSaturated(pool)) => {
                self.inner.store.put(scheduled);
                let in_flight = self.inner.normal.in_flight();
                if requeues < self.inner.requeue_limit {
                    let delay = self.inner.requeue_policy.next_delay(requeues + 1);
                    warn!(
                        %job_id,
                        %pool,
                        in_flight,
                        requeues = requeues + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retry not admitted, requeued"
                    );
                    self.arm_retry(job_id, delay, requeues + 1).await;
                } else {
                    error!(
                        %job_id,
                        %pool,
                        in_flight,
                        requeues,
                        "retry requeue limit reached, retry dropped"
                    );
                }
            }
            Err(e) => {
                self.inner.store.put(scheduled);
                warn!(%job_id, error = %e, "retry dropped");
            }
        }
    }

    // ---- compensation path ----

    async fn fail_and_compensate(&self, mut job: Job) {
        let job_id = job.job_id();
        if let Err(e) = job.mark_failed() {
            error!(%job_id, error = %e, "cannot mark failed");
            return;
        }
        self.inner.store.put(job);
        self.dispatch_compensation(job_id, 0).await;
    }

    async fn dispatch_compensation(&self, job_id: JobId, requeues: u32) {
        match self
            .inner
            .compensation
            .try_submit(self.compensation_item(job_id))
            .await
        {
            Ok(()) => debug!(%job_id, "compensation dispatched"),
            Err(QueueError::QueueSaturated(pool)) if requeues < self.inner.requeue_limit => {
                let delay = self.inner.requeue_policy.next_delay(requeues + 1);
                warn!(
                    %job_id,
                    %pool,
                    in_flight = self.inner.compensation.in_flight(),
                    requeues = requeues + 1,
                    delay_ms = delay.as_millis() as u64,
                    "compensation not admitted, requeued"
                );
                let item = self.redispatch_compensation_item(job_id, requeues + 1);
                if let Err(e) = self.inner.scheduler.schedule(job_id, delay, item).await {
                    warn!(%job_id, error = %e, "compensation requeue dropped");
                }
            }
            Err(QueueError::QueueSaturated(pool)) => {
                error!(%job_id, %pool, requeues, "compensation requeue limit reached");
                self.finish_compensation(job_id, Err("compensation pool saturated".to_string()));
            }
            Err(e) => warn!(%job_id, error = %e, "compensation not dispatched"),
        }
    }

    async fn run_compensation(self, job_id: JobId) {
        let Some(job) = self.inner.store.get(job_id) else {
            error!(%job_id, "job to compensate is missing from the store");
            return;
        };
        // at most once: only a FAILED job is compensated
        if job.status() != JobStatus::Failed {
            debug!(%job_id, status = %job.status(), "compensation skipped");
            return;
        }

        let handler = match self.inner.registry.get(job.job_type()) {
            Ok(handler) => handler,
            Err(e) => {
                error!(%job_id, error = %e, "handler lookup failed");
                self.finish_compensation(job_id, Err(e.to_string()));
                return;
            }
        };

        let state = LastKnownState {
            job_id,
            job_type: job.job_type().clone(),
            payload: job.payload().clone(),
            attempts: job.attempts(),
            last_error: job.last_error().map(str::to_string),
        };
        info!(%job_id, job_type = %job.job_type(), attempts = job.attempts(), "compensation started");
        let joined = tokio::spawn(async move { handler.compensate(&state).await }).await;
        let outcome = match joined {
            Ok(result) => result.map_err(|e| e.message().to_string()),
            Err(e) => Err(join_failure(e)),
        };
        self.finish_compensation(job_id, outcome);
    }

    fn finish_compensation(&self, job_id: JobId, outcome: Result<(), String>) {
        let Some(mut job) = self.inner.store.get(job_id) else {
            error!(%job_id, "compensated job is missing from the store");
            return;
        };
        let now = self.inner.clock.now();
        let transition = match &outcome {
            Ok(()) => job.mark_compensated(now),
            Err(message) => job.mark_compensation_failed(message, now),
        };
        if let Err(e) = transition {
            error!(%job_id, error = %e, "cannot record compensation outcome");
            return;
        }
        let last_error = job.last_error().unwrap_or_default().to_string();
        self.inner.store.put(job);
        match outcome {
            Ok(()) => info!(%job_id, "job compensated"),
            Err(_) => error!(%job_id, error = %last_error, "compensation failed"),
        }
    }
}

/// Handler tasks only end abnormally by panicking (they are never aborted).
fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task cancelled".to_string();
    }
    let panic = err.into_panic();
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    format!("handler panicked: {detail}")
}
