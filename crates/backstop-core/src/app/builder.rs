//! EngineBuilder - 構築とワイヤリング
//!
//! # ポイント
//! - Builder パターン
//! - 起動時検証（Fail-fast）: config と期待 job_type を build() でチェック
//! - 未指定の collaborator はインメモリ / システム時計で補う

use std::sync::Arc;

use tracing::info;

use super::orchestrator::{Components, JobOrchestrator};
use crate::config::{ConfigError, QueueConfig, validate_config};
use crate::domain::{Decider, DefaultDecider};
use crate::impls::InMemoryJobStore;
use crate::ports::{Clock, JobStore, SystemClock, UlidGenerator};
use crate::queue::RetryPolicy;
use crate::typed::{HandlerRegistry, JobHandler, JobKind, RegistryError, TypedHandler};

/// Builds a running [`JobOrchestrator`].
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .config(config)
///     .register_typed::<SendEmail, _>(EmailHandler)?
///     .expect_types(&["sendEmail"])
///     .build()?;
/// ```
///
/// `build()` spawns the worker pools and the retry scheduler, so it must be
/// called inside a tokio runtime.
pub struct EngineBuilder {
    config: QueueConfig,
    registry: HandlerRegistry,
    expected_types: Option<Vec<String>>,
    store: Option<Arc<dyn JobStore>>,
    clock: Option<Arc<dyn Clock>>,
    decider: Option<Arc<dyn Decider>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing job types: {0:?}. These job types were expected but not registered.")]
    MissingJobTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            registry: HandlerRegistry::new(),
            expected_types: None,
            store: None,
            clock: None,
            decider: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register(
        mut self,
        job_type: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(job_type, handler)?;
        Ok(self)
    }

    pub fn register_typed<K: JobKind, H: TypedHandler<K> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register_typed::<K, H>(handler)?;
        Ok(self)
    }

    /// Job types that must be registered by the time `build()` runs.
    pub fn expect_types(mut self, job_types: &[&str]) -> Self {
        self.expected_types = Some(job_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the attempt-cap decider built from `config.retry`.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// # 検証
    /// - config が妥当か
    /// - expect_types() の job_type が全て登録済みか
    pub fn build(self) -> Result<JobOrchestrator, BuildError> {
        validate_config(&self.config)?;

        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(&t.as_str().into()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobTypes(missing));
            }
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let retry = &self.config.retry;
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(
                RetryPolicy::from_config(retry),
                retry.max_attempts,
            )) as Arc<dyn Decider>
        });
        let components = Components {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>),
            registry: self.registry,
            decider,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        };
        let job_types: Vec<String> = components
            .registry
            .registered_types()
            .iter()
            .map(ToString::to_string)
            .collect();
        info!(?job_types, "engine built");
        Ok(JobOrchestrator::start(&self.config, components))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::{HandlerError, LastKnownState};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SendEmail {
        to: String,
    }

    impl JobKind for SendEmail {
        const TYPE: &'static str = "sendEmail";
    }

    struct EmailHandler;

    #[async_trait]
    impl TypedHandler<SendEmail> for EmailHandler {
        async fn execute(&self, _job: SendEmail) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn execute(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn compensate(&self, _state: &LastKnownState) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn build_success() {
        let engine = EngineBuilder::new()
            .register_typed::<SendEmail, _>(EmailHandler)
            .unwrap()
            .register("generateReport", Arc::new(Noop))
            .unwrap()
            .expect_types(&[SendEmail::TYPE, "generateReport"])
            .build();
        assert!(engine.is_ok());
        engine.unwrap().shutdown().await;
    }

    #[tokio::test]
    async fn build_missing_job_types() {
        let engine = EngineBuilder::new()
            .register_typed::<SendEmail, _>(EmailHandler)
            .unwrap()
            .expect_types(&[SendEmail::TYPE, "generateReport"])
            .build();
        assert!(matches!(
            engine,
            Err(BuildError::MissingJobTypes(missing)) if missing == vec!["generateReport".to_string()]
        ));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let result = EngineBuilder::new()
            .register("sendEmail", Arc::new(Noop))
            .unwrap()
            .register_typed::<SendEmail, _>(EmailHandler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = QueueConfig::default();
        config.normal_pool.workers = 0;
        let engine = EngineBuilder::new().config(config).build();
        assert!(matches!(engine, Err(BuildError::Config(ConfigError::Validation(_)))));
    }
}
