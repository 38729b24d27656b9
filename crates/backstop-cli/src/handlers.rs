//! Demo handlers with simulated latency and failures.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use backstop_core::{HandlerError, JobKind, LastKnownState, TypedHandler};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    pub subject: String,
}

impl JobKind for EmailJob {
    const TYPE: &'static str = "sendEmail";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportJob {
    pub report_name: String,
}

impl JobKind for ReportJob {
    const TYPE: &'static str = "generateReport";
}

/// Sleep for a random duration in `range_ms`, then roll for failure.
async fn simulate(range_ms: Range<u64>, failure_rate: f64) -> bool {
    let ms = rand::thread_rng().gen_range(range_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    rand::thread_rng().gen_bool(failure_rate)
}

pub struct EmailHandler {
    failure_rate: f64,
}

impl EmailHandler {
    pub fn new(failure_rate: f64) -> Self {
        Self { failure_rate }
    }
}

#[async_trait]
impl TypedHandler<EmailJob> for EmailHandler {
    async fn execute(&self, job: EmailJob) -> Result<(), HandlerError> {
        if simulate(50..200, self.failure_rate).await {
            return Err(format!("smtp timeout sending to {}", job.to).into());
        }
        info!(to = %job.to, subject = %job.subject, "email sent");
        Ok(())
    }

    async fn compensate(&self, job: EmailJob, state: &LastKnownState) -> Result<(), HandlerError> {
        info!(job_id = %state.job_id, to = %job.to, "bounce notice queued for undelivered email");
        Ok(())
    }
}

pub struct ReportHandler {
    failure_rate: f64,
}

impl ReportHandler {
    pub fn new(failure_rate: f64) -> Self {
        Self { failure_rate }
    }
}

#[async_trait]
impl TypedHandler<ReportJob> for ReportHandler {
    async fn execute(&self, job: ReportJob) -> Result<(), HandlerError> {
        if simulate(100..400, self.failure_rate).await {
            return Err(format!("report {} timed out", job.report_name).into());
        }
        info!(report = %job.report_name, "report generated");
        Ok(())
    }

    /// Removing partial output can itself fail.
    async fn compensate(&self, job: ReportJob, state: &LastKnownState) -> Result<(), HandlerError> {
        if simulate(20..80, 0.5).await {
            return Err(format!("could not remove partial output of {}", job.report_name).into());
        }
        info!(job_id = %state.job_id, report = %job.report_name, "partial report removed");
        Ok(())
    }
}
