//! Queue machinery: bounded worker pools, the retry scheduler, backoff
//! policy and the idempotency index.
//!
//! Nothing here knows about job semantics. The orchestrator composes these
//! pieces and owns every status transition.

mod idempotency;
mod pool;
mod retry;
mod scheduler;

pub use idempotency::{Claim, IdempotencyIndex};
pub use pool::{PoolKind, ShutdownMode, WorkItem, WorkerPool};
pub use retry::RetryPolicy;
pub use scheduler::RetryScheduler;
