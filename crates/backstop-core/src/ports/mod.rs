//! Ports - seams to the outside world.
//!
//! Each trait hides an external concern (storage, time, id generation) so the
//! orchestrator can be tested with in-memory or fixed implementations.

pub mod clock;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
