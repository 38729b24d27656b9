//! Job record and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::JobId;
use super::state::JobStatus;
use crate::error::QueueError;

/// Key into the handler registry (e.g. `sendEmail`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle record of one submitted job.
///
/// Design:
/// - Single source of truth for job state, kept in the `JobStore`.
/// - Only the orchestrator mutates it, and only through the transition
///   methods below. Readers get cloned snapshots.
/// - `job_id`, `job_type`, `payload` and `idempotency_key` are fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    job_id: JobId,
    job_type: JobType,
    payload: serde_json::Value,
    idempotency_key: Option<String>,

    status: JobStatus,

    /// Number of failed executions so far. Only grows.
    attempts: u32,

    /// Overwritten on each failure.
    last_error: Option<String>,

    /// Set on the first execution and never overwritten.
    started_at: Option<DateTime<Utc>>,

    /// Set once, on reaching a terminal state.
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_id: JobId,
        job_type: JobType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            job_id,
            job_type,
            payload,
            idempotency_key,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                job_id: self.job_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark as running. `started_at` is only set on the first attempt.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Running)?;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Succeeded)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Record a failed execution. Status is left for the retry decision.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.attempts += 1;
    }

    pub fn schedule_retry(&mut self) -> Result<(), QueueError> {
        self.transition(JobStatus::RetryScheduled)
    }

    /// Move from RetryScheduled back to Queued.
    pub fn requeue(&mut self) -> Result<(), QueueError> {
        self.transition(JobStatus::Queued)
    }

    /// Attempts exhausted; compensation follows.
    pub fn mark_failed(&mut self) -> Result<(), QueueError> {
        self.transition(JobStatus::Failed)
    }

    pub fn mark_compensated(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Compensated)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// The original execution error stays first in `last_error`.
    pub fn mark_compensation_failed(
        &mut self,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.transition(JobStatus::CompensationFailed)?;
        let original = self.last_error.as_deref().unwrap_or("UNKNOWN");
        self.last_error = Some(format!("{original} | compensation: {error}"));
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id,
            status: self.status,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Job status for polling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn job() -> Job {
        Job::new(
            JobId::from_ulid(Ulid::new()),
            JobType::new("sendEmail"),
            serde_json::json!({"to": "a@b.c"}),
            Some("key-1".to_string()),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_job_starts_queued() {
        let job = job();
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.attempts(), 0);
        assert!(job.last_error().is_none());
        assert!(job.started_at().is_none());
        assert_eq!(job.idempotency_key(), Some("key-1"));
    }

    #[test]
    fn started_at_survives_retries() {
        let mut job = job();
        job.start_attempt(t0()).unwrap();
        job.record_failure("boom");
        job.schedule_retry().unwrap();
        job.requeue().unwrap();
        job.start_attempt(t0() + Duration::seconds(5)).unwrap();

        assert_eq!(job.started_at(), Some(t0()));
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.last_error(), Some("boom"));
    }

    #[test]
    fn success_sets_completed_at() {
        let mut job = job();
        job.start_attempt(t0()).unwrap();
        job.mark_succeeded(t0() + Duration::seconds(1)).unwrap();

        let view = job.status_view();
        assert_eq!(view.status, JobStatus::Succeeded);
        assert!(view.started_at <= view.completed_at);
    }

    #[test]
    fn compensation_failure_keeps_original_error_first() {
        let mut job = job();
        job.start_attempt(t0()).unwrap();
        job.record_failure("SMTP temp failure");
        job.mark_failed().unwrap();
        job.mark_compensation_failed("undo failed", t0()).unwrap();

        assert_eq!(job.status(), JobStatus::CompensationFailed);
        assert_eq!(
            job.last_error(),
            Some("SMTP temp failure | compensation: undo failed")
        );
        assert_eq!(job.completed_at(), Some(t0()));
    }

    #[test]
    fn terminal_job_rejects_further_transitions() {
        let mut job = job();
        job.start_attempt(t0()).unwrap();
        job.mark_succeeded(t0()).unwrap();

        let err = job.mark_failed().unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: JobStatus::Succeeded,
                to: JobStatus::Failed,
                ..
            }
        ));
        assert_eq!(job.status(), JobStatus::Succeeded);
    }

    #[test]
    fn status_view_omits_absent_fields() {
        let view = job().status_view();
        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["status"], "QUEUED");
        assert_eq!(v["attempts"], 0);
        assert!(v.get("last_error").is_none());
        assert!(v.get("completed_at").is_none());
    }
}
