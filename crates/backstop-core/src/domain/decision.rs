//! Decision model: what happens to a job after a failed attempt.
//!
//! The Decider is a pure function of the job record. Carrying out the decision
//! (persisting the transition, arming the scheduler, dispatching compensation)
//! is the orchestrator's job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::JobId;
use super::job::Job;
use crate::queue::RetryPolicy;

/// The next action for a job whose attempt just failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Hand the job back to the normal pool after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up on execution and run the handler's compensation.
    Compensate { reason: String },
}

pub trait Decider: Send + Sync {
    /// `job.attempts()` already includes the failure being decided on.
    fn decide(&self, job: &Job) -> Decision;
}

/// Attempt cap + exponential backoff with jitter.
///
/// - Retry if attempts < max_attempts
/// - Compensate once attempts reach max_attempts
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    max_attempts: u32,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            retry_policy,
            max_attempts,
        }
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), 3)
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &Job) -> Decision {
        if job.attempts() >= self.max_attempts {
            Decision::Compensate {
                reason: format!(
                    "max attempts reached: {}/{}",
                    job.attempts(), self.max_attempts
                ),
            }
        } else {
            let delay = self.retry_policy.next_delay(job.attempts());
            Decision::Retry {
                delay,
                reason: format!(
                    "retry {}/{} after {:?}",
                    job.attempts() + 1,
                    self.max_attempts,
                    delay
                ),
            }
        }
    }
}

/// A decision taken for a job, kept so "why did the system do X" can be answered.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub job_id: JobId,

    /// Failed attempts at the time of the decision.
    pub attempts: u32,

    pub decision: Decision,

    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(job: &Job, decision: Decision, decided_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.job_id(),
            attempts: job.attempts(),
            decision,
            decided_at,
        }
    }
}
