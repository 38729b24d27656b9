//! backstop-core
//!
//! Asynchronous job execution with bounded worker pools, retry with
//! exponential backoff, and compensation for jobs that exhaust their attempts.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, status, decision）
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryJobStore）
//! - **typed**: ハンドラ API（JobHandler, TypedHandler, HandlerRegistry）
//! - **queue**: ワーカープール, RetryScheduler, RetryPolicy, IdempotencyIndex
//! - **app**: EngineBuilder, JobOrchestrator
//! - **config**: QueueConfig の読み込みと検証
//! - **error**: QueueError と分類

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{BuildError, EngineBuilder, JobOrchestrator};
pub use config::{ConfigError, QueueConfig, load_config};
pub use domain::{Job, JobId, JobStatus, JobStatusView, JobType};
pub use error::{ErrorKind, QueueError};
pub use typed::{HandlerError, JobHandler, JobKind, LastKnownState, TypedHandler};
