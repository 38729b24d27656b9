//! InMemoryJobStore - process-lifetime job storage.
//!
//! Records are never deleted. `get` hands out clones, so a reader holds a
//! snapshot and never sees a half-applied transition.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobId, JobStatus};
use crate::ports::JobStore;

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, Job>,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub retry_scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub compensated: usize,
    pub compensation_failed: usize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn counts_by_status(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            match entry.value().status() {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::RetryScheduled => counts.retry_scheduled += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Compensated => counts.compensated += 1,
                JobStatus::CompensationFailed => counts.compensation_failed += 1,
            }
        }
        counts
    }
}

impl JobStore for InMemoryJobStore {
    fn get(&self, job_id: JobId) -> Option<Job> {
        self.jobs.get(&job_id).map(|entry| entry.value().clone())
    }

    fn put(&self, job: Job) {
        self.jobs.insert(job.job_id(), job);
    }
}
