//! Job state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job status.
///
/// State transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> RetryScheduled -> Queued (loop until max_attempts)
/// - Queued -> Running -> Failed -> Compensated | CompensationFailed
///
/// `Failed` is transient: it marks a job whose attempts are exhausted and whose
/// compensation has been (or is about to be) dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted and waiting for a normal-pool worker.
    Queued,

    /// Currently being executed by a worker.
    Running,

    /// Waiting for the retry scheduler (backoff).
    RetryScheduled,

    /// Successfully completed.
    Succeeded,

    /// Attempts exhausted; compensation pending.
    Failed,

    /// Compensation ran successfully.
    Compensated,

    /// Compensation itself failed.
    CompensationFailed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Compensated | JobStatus::CompensationFailed
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Succeeded)
                | (Running, RetryScheduled)
                | (Running, Failed)
                | (RetryScheduled, Queued)
                | (Failed, Compensated)
                | (Failed, CompensationFailed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::RetryScheduled => "RETRY_SCHEDULED",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Compensated => "COMPENSATED",
            JobStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(JobStatus::Queued, JobStatus::Running)]
    #[case::succeed(JobStatus::Running, JobStatus::Succeeded)]
    #[case::retry(JobStatus::Running, JobStatus::RetryScheduled)]
    #[case::readmit(JobStatus::RetryScheduled, JobStatus::Queued)]
    #[case::exhaust(JobStatus::Running, JobStatus::Failed)]
    #[case::compensate(JobStatus::Failed, JobStatus::Compensated)]
    #[case::compensation_fails(JobStatus::Failed, JobStatus::CompensationFailed)]
    fn allowed_transitions(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_running(JobStatus::Queued, JobStatus::Succeeded)]
    #[case::leave_terminal(JobStatus::Succeeded, JobStatus::Running)]
    #[case::recompensate(JobStatus::Compensated, JobStatus::Failed)]
    #[case::compensate_running(JobStatus::Running, JobStatus::Compensated)]
    #[case::retry_after_failed(JobStatus::Failed, JobStatus::Queued)]
    #[case::compensate_before_exhausted(JobStatus::RetryScheduled, JobStatus::Failed)]
    fn rejected_transitions(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Compensated.is_terminal());
        assert!(JobStatus::CompensationFailed.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::RetryScheduled.is_terminal());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let s = serde_json::to_string(&JobStatus::CompensationFailed).unwrap();
        assert_eq!(s, "\"COMPENSATION_FAILED\"");
        assert_eq!(JobStatus::RetryScheduled.to_string(), "RETRY_SCHEDULED");
    }
}
