use thiserror::Error;

use crate::domain::{JobId, JobStatus, JobType};
use crate::queue::PoolKind;

/// Operational classification of a [`QueueError`].
///
/// - Overload: admission rejected; the caller may retry later.
/// - Config: programmer/configuration mistake; retrying cannot help.
/// - NotFound: unknown job identifier.
/// - Unavailable: the engine is shutting down.
/// - Internal: a state-machine invariant was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Overload,
    Config,
    NotFound,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0} queue is full, try again later")]
    QueueSaturated(PoolKind),

    #[error("no handler registered for job_type={0}")]
    UnknownJobType(JobType),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("{0} pool is shut down")]
    PoolClosed(PoolKind),

    #[error("retry scheduler is stopped")]
    SchedulerStopped,

    #[error("job {job_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::QueueSaturated(_) => ErrorKind::Overload,
            QueueError::UnknownJobType(_) => ErrorKind::Config,
            QueueError::NotFound(_) => ErrorKind::NotFound,
            QueueError::PoolClosed(_) | QueueError::SchedulerStopped => ErrorKind::Unavailable,
            QueueError::InvalidTransition { .. } => ErrorKind::Internal,
        }
    }

    /// Only backpressure rejections are worth resubmitting as-is.
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::Overload
    }
}
