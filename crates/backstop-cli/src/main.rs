//! backstop demo
//!
//! Submits a batch of `sendEmail` / `generateReport` jobs, polls them until
//! they settle, prints the final snapshots as JSON and shuts down.
//!
//! ```bash
//! cargo run -p backstop-cli -- --jobs 20
//! RUST_LOG=backstop_core=debug cargo run -p backstop-cli -- --config backstop.toml
//! ```

mod handlers;
mod observability;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backstop_core::impls::InMemoryJobStore;
use backstop_core::{EngineBuilder, JobId, JobKind, JobOrchestrator, load_config};
use clap::Parser;
use tracing::{info, warn};

use crate::handlers::{EmailHandler, EmailJob, ReportHandler, ReportJob};

#[derive(Parser, Debug)]
#[command(name = "backstop", version, about = "Job queue demo with retries and compensation")]
struct Args {
    /// TOML config file (BACKSTOP_* env vars override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of jobs to submit
    #[arg(long, default_value_t = 12)]
    jobs: usize,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Give up waiting for jobs after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    observability::init(&config.logging.level, config.logging.json || args.json_logs);

    let store = Arc::new(InMemoryJobStore::new());
    let engine = EngineBuilder::new()
        .config(config)
        .store(store.clone())
        .register_typed::<EmailJob, _>(EmailHandler::new(0.4))?
        .register_typed::<ReportJob, _>(ReportHandler::new(0.3))?
        .expect_types(&[EmailJob::TYPE, ReportJob::TYPE])
        .build()?;

    let job_ids = submit_batch(&engine, args.jobs).await?;

    tokio::select! {
        _ = wait_until_settled(&engine, &job_ids, Duration::from_secs(args.timeout_secs)) => {}
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }

    for job_id in &job_ids {
        let view = engine.get_status(*job_id)?;
        println!("{}", serde_json::to_string(&view)?);
    }
    println!("{}", serde_json::to_string(&store.counts_by_status())?);

    engine.shutdown().await;
    Ok(())
}

/// Submit `count` jobs, alternating types. The first key is submitted twice
/// to show deduplication.
async fn submit_batch(
    engine: &JobOrchestrator,
    count: usize,
) -> Result<Vec<JobId>, Box<dyn std::error::Error>> {
    let mut job_ids = Vec::new();
    for i in 0..count {
        let key = format!("demo-{i}");
        let submitted = if i % 2 == 0 {
            let job = EmailJob {
                to: format!("user{i}@example.com"),
                subject: format!("Welcome #{i}"),
            };
            engine
                .submit(EmailJob::TYPE, serde_json::to_value(job)?, Some(&key))
                .await
        } else {
            let job = ReportJob {
                report_name: format!("monthly-{i}"),
            };
            engine
                .submit(ReportJob::TYPE, serde_json::to_value(job)?, Some(&key))
                .await
        };
        match submitted {
            Ok(job) => job_ids.push(job.job_id()),
            Err(e) if e.is_retriable() => warn!(idempotency_key = %key, error = %e, "not accepted"),
            Err(e) => return Err(e.into()),
        }
    }

    if count > 0 {
        let again = EmailJob {
            to: "someone-else@example.com".to_string(),
            subject: "duplicate".to_string(),
        };
        let dup = engine
            .submit(EmailJob::TYPE, serde_json::to_value(again)?, Some("demo-0"))
            .await?;
        info!(job_id = %dup.job_id(), "duplicate key resolved to the existing job");
    }
    Ok(job_ids)
}

async fn wait_until_settled(engine: &JobOrchestrator, job_ids: &[JobId], timeout: Duration) {
    let settled = tokio::time::timeout(timeout, async {
        loop {
            let pending = job_ids
                .iter()
                .filter(|id| {
                    engine
                        .get_status(**id)
                        .map(|view| !view.status.is_terminal())
                        .unwrap_or(false)
                })
                .count();
            if pending == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if settled.is_err() {
        warn!(timeout_secs = timeout.as_secs(), "some jobs did not settle in time");
    }
}
