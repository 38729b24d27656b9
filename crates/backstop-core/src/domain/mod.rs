//! Domain model (ids, job record, status, decisions).

pub mod decision;
pub mod ids;
pub mod job;
pub mod state;

pub use decision::{Decider, Decision, DecisionRecord, DefaultDecider};
pub use ids::{JobId, ParseJobIdError};
pub use job::{Job, JobStatusView, JobType};
pub use state::JobStatus;
