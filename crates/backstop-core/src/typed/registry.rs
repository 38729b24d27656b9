//! HandlerRegistry - job_type -> handler.
//!
//! Built during initialization (mutable), then shared immutably by every
//! worker. No locks are needed on the lookup path.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{JobHandler, Typed, TypedHandler};
use super::kind::JobKind;
use crate::domain::JobType;
use crate::error::QueueError;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for job type '{0}' is already registered")]
    AlreadyRegistered(JobType),
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type. Registering the same type twice is
    /// a wiring mistake and is rejected.
    pub fn register(
        &mut self,
        job_type: impl Into<JobType>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), RegistryError> {
        let job_type = job_type.into();
        if self.handlers.contains_key(&job_type) {
            return Err(RegistryError::AlreadyRegistered(job_type));
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Register a typed handler under `K::TYPE`.
    pub fn register_typed<K: JobKind, H: TypedHandler<K> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register(JobType::new(K::TYPE), Arc::new(Typed::<K, H>::new(handler)))
    }

    /// Unregistered types are configuration errors, never retried.
    pub fn get(&self, job_type: &JobType) -> Result<Arc<dyn JobHandler>, QueueError> {
        self.handlers
            .get(job_type)
            .cloned()
            .ok_or_else(|| QueueError::UnknownJobType(job_type.clone()))
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.handlers.keys().cloned().collect()
    }
}
