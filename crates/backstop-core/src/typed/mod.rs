//! Typed - handler API
//!
//! Maps a job_type string to the code that executes and compensates it.
//!
//! # 二層構造
//! - **Typed**: `JobKind` trait, `TypedHandler<K>` trait - payload decoded into a struct
//! - **Dyn**: `JobHandler` trait - object-safe, raw JSON payload

pub mod handler;
pub mod kind;
pub mod registry;

pub use self::handler::{HandlerError, JobHandler, LastKnownState, Typed, TypedHandler};
pub use self::kind::JobKind;
pub use self::registry::{HandlerRegistry, RegistryError};
