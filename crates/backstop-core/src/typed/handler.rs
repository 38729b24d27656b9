//! Handler traits - execute/compensate per job type.
//!
//! # 二層構造
//! - **Dyn**: `JobHandler` - object-safe, stored in the registry as `Arc<dyn JobHandler>`
//! - **Typed**: `TypedHandler<K>` - receives the decoded payload struct
//!
//! `Typed<K, H>` erases a `TypedHandler<K>` into a `JobHandler`.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;

use super::kind::JobKind;
use crate::domain::{JobId, JobType};

/// Failure reported by a handler. The message ends up in `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// What compensation gets to work with: the best-known state of the job
/// after its final failed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LastKnownState {
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Object-safe handler stored in the registry.
///
/// `execute` failures are treated as transient and retried. `compensate` runs
/// at most once, after the last failed attempt. An error from it marks the
/// job COMPENSATION_FAILED; it is never retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, payload: &serde_json::Value) -> Result<(), HandlerError>;

    async fn compensate(&self, state: &LastKnownState) -> Result<(), HandlerError>;
}

/// Handler for a single typed payload.
///
/// ```ignore
/// struct EmailHandler;
///
/// #[async_trait]
/// impl TypedHandler<SendEmail> for EmailHandler {
///     async fn execute(&self, job: SendEmail) -> Result<(), HandlerError> {
///         smtp_send(&job.to).await.map_err(|e| HandlerError::new(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait TypedHandler<K: JobKind>: Send + Sync {
    async fn execute(&self, job: K) -> Result<(), HandlerError>;

    /// Nothing to undo by default.
    async fn compensate(&self, _job: K, _state: &LastKnownState) -> Result<(), HandlerError> {
        Ok(())
    }
}

pub struct Typed<K: JobKind, H: TypedHandler<K>> {
    handler: H,
    _marker: PhantomData<fn() -> K>,
}

impl<K: JobKind, H: TypedHandler<K>> Typed<K, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

fn decode<K: JobKind>(payload: &serde_json::Value) -> Result<K, HandlerError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| HandlerError::new(format!("{}: json decode: {e}", K::TYPE)))
}

#[async_trait]
impl<K: JobKind, H: TypedHandler<K>> JobHandler for Typed<K, H> {
    async fn execute(&self, payload: &serde_json::Value) -> Result<(), HandlerError> {
        let job = decode::<K>(payload)?;
        self.handler.execute(job).await
    }

    async fn compensate(&self, state: &LastKnownState) -> Result<(), HandlerError> {
        let job = decode::<K>(&state.payload)?;
        self.handler.compensate(job, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;
    use ulid::Ulid;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        value: i32,
    }

    impl JobKind for Ping {
        const TYPE: &'static str = "test.ping";
    }

    #[derive(Default)]
    struct PingHandler {
        seen: Mutex<Vec<i32>>,
    }

    #[async_trait]
    impl TypedHandler<Ping> for PingHandler {
        async fn execute(&self, job: Ping) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(job.value);
            if job.value < 0 {
                return Err(HandlerError::new("negative"));
            }
            Ok(())
        }
    }

    fn state(payload: serde_json::Value) -> LastKnownState {
        LastKnownState {
            job_id: JobId::from_ulid(Ulid::new()),
            job_type: JobType::new(Ping::TYPE),
            payload,
            attempts: 3,
            last_error: Some("negative".to_string()),
        }
    }

    #[tokio::test]
    async fn typed_handler_receives_decoded_payload() {
        let typed = Typed::<Ping, _>::new(PingHandler::default());

        typed.execute(&json!({ "value": 100 })).await.unwrap();
        let err = typed.execute(&json!({ "value": -1 })).await.unwrap_err();

        assert_eq!(err.message(), "negative");
        assert_eq!(*typed.handler.seen.lock().unwrap(), vec![100, -1]);
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_handler_error() {
        let typed = Typed::<Ping, _>::new(PingHandler::default());
        let err = typed.execute(&json!({ "nope": true })).await.unwrap_err();
        assert!(err.message().starts_with("test.ping: json decode"));
        assert!(typed.handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_compensation_is_a_no_op() {
        let typed = Typed::<Ping, _>::new(PingHandler::default());
        typed.compensate(&state(json!({ "value": 1 }))).await.unwrap();
    }
}
