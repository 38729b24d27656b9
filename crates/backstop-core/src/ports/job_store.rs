//! JobStore port - where job records live.
//!
//! The orchestrator treats the store as a plain key-value repository:
//! every status transition is a get, a local mutation and a put. Only one
//! worker touches a given job at a time, so no compare-and-swap is needed.
//! Readers must never observe a torn record: `put` replaces the whole snapshot.
//!
//! The in-memory implementation lives in `impls::inmem_store`. A durable
//! backend can be swapped in behind this trait without touching orchestration.

use crate::domain::{Job, JobId};

pub trait JobStore: Send + Sync {
    /// Snapshot of the job, if known.
    fn get(&self, job_id: JobId) -> Option<Job>;

    /// Insert or replace the job record.
    fn put(&self, job: Job);
}
