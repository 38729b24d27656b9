//! Engine configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `BACKSTOP_*` environment variables. The result is validated before use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::queue::ShutdownMode;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ---- file shape (every field optional) ----

#[derive(Debug, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub normal_pool: Option<PoolSection>,
    #[serde(default)]
    pub compensation_pool: Option<PoolSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub shutdown: Option<ShutdownMode>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
pub struct PoolSection {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub jitter_ms: Option<u64>,
    #[serde(default)]
    pub requeue_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

// ---- resolved config ----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    pub normal_pool: PoolConfig,
    pub compensation_pool: PoolConfig,
    pub retry: RetryConfig,
    pub shutdown: ShutdownMode,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryConfig {
    /// Total executions allowed per job, first attempt included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Exclusive upper bound of the random jitter added to each backoff.
    pub jitter_ms: u64,
    /// How many times a due retry may find its pool full before giving up.
    pub requeue_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            normal_pool: PoolConfig {
                workers: 5,
                queue_depth: 10,
            },
            compensation_pool: PoolConfig {
                workers: 2,
                queue_depth: 5,
            },
            retry: RetryConfig::default(),
            shutdown: ShutdownMode::Drain,
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            jitter_ms: 250,
            requeue_limit: 3,
        }
    }
}

/// Load a RawConfigFile from a TOML file.
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let s = fs::read_to_string(path)?;
    parse_config_str(&s)
}

pub fn parse_config_str(s: &str) -> Result<RawConfigFile, ConfigError> {
    toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
}

macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
}

fn apply_pool(target: &mut PoolConfig, section: Option<PoolSection>) {
    if let Some(pool) = section {
        apply_opt!(target.workers, pool.workers);
        apply_opt!(target.queue_depth, pool.queue_depth);
    }
}

/// Overlay file values onto `cfg`.
pub fn apply_raw(cfg: &mut QueueConfig, raw: RawConfigFile) {
    apply_pool(&mut cfg.normal_pool, raw.normal_pool);
    apply_pool(&mut cfg.compensation_pool, raw.compensation_pool);
    if let Some(retry) = raw.retry {
        apply_opt!(cfg.retry.max_attempts, retry.max_attempts);
        apply_opt!(cfg.retry.base_delay_ms, retry.base_delay_ms);
        apply_opt!(cfg.retry.jitter_ms, retry.jitter_ms);
        apply_opt!(cfg.retry.requeue_limit, retry.requeue_limit);
    }
    apply_opt!(cfg.shutdown, raw.shutdown);
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, logging.level);
        apply_opt!(cfg.logging.json, logging.json);
    }
}

/// Load concrete `QueueConfig` from optional file and the process environment.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<QueueConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`], reading variables through `lookup`.
pub fn load_config_with<P, F>(path: Option<P>, lookup: F) -> Result<QueueConfig, ConfigError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = QueueConfig::default();
    if let Some(p) = path {
        apply_raw(&mut cfg, load_raw_from_file(p)?);
    }
    apply_env_overrides_from(&mut cfg, lookup)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(()),
    }
}

fn parse_shutdown(s: &str) -> Result<ShutdownMode, ()> {
    match s.to_ascii_lowercase().as_str() {
        "drain" => Ok(ShutdownMode::Drain),
        "abandon" => Ok(ShutdownMode::Abandon),
        _ => Err(()),
    }
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        None => Ok(None),
    }
}

fn env_with<T, F>(lookup: &F, key: &str, parse: fn(&str) -> Result<T, ()>) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => parse(v.trim())
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        None => Ok(None),
    }
}

/// Apply `BACKSTOP_*` overrides read through `lookup`.
pub fn apply_env_overrides_from<F>(cfg: &mut QueueConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Pools
    apply_opt!(cfg.normal_pool.workers, env_parse(&lookup, "BACKSTOP_NORMAL_WORKERS")?);
    apply_opt!(cfg.normal_pool.queue_depth, env_parse(&lookup, "BACKSTOP_NORMAL_QUEUE_DEPTH")?);
    apply_opt!(cfg.compensation_pool.workers, env_parse(&lookup, "BACKSTOP_COMPENSATION_WORKERS")?);
    apply_opt!(
        cfg.compensation_pool.queue_depth,
        env_parse(&lookup, "BACKSTOP_COMPENSATION_QUEUE_DEPTH")?
    );

    // Retry
    apply_opt!(cfg.retry.max_attempts, env_parse(&lookup, "BACKSTOP_MAX_ATTEMPTS")?);
    apply_opt!(cfg.retry.base_delay_ms, env_parse(&lookup, "BACKSTOP_BASE_DELAY_MS")?);
    apply_opt!(cfg.retry.jitter_ms, env_parse(&lookup, "BACKSTOP_JITTER_MS")?);
    apply_opt!(cfg.retry.requeue_limit, env_parse(&lookup, "BACKSTOP_REQUEUE_LIMIT")?);

    apply_opt!(cfg.shutdown, env_with(&lookup, "BACKSTOP_SHUTDOWN", parse_shutdown)?);

    // Logging
    if let Some(v) = lookup("BACKSTOP_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    apply_opt!(cfg.logging.json, env_with(&lookup, "BACKSTOP_LOG_JSON", parse_bool)?);

    Ok(())
}

pub fn validate_config(cfg: &QueueConfig) -> Result<(), ConfigError> {
    for (name, pool) in [
        ("normal_pool", &cfg.normal_pool),
        ("compensation_pool", &cfg.compensation_pool),
    ] {
        if pool.workers == 0 {
            return Err(ConfigError::Validation(format!("{name}.workers must be >= 1")));
        }
        if pool.queue_depth == 0 {
            return Err(ConfigError::Validation(format!("{name}.queue_depth must be >= 1")));
        }
    }
    if cfg.retry.max_attempts == 0 {
        return Err(ConfigError::Validation("retry.max_attempts must be >= 1".into()));
    }
    if cfg.logging.level.trim().is_empty() {
        return Err(ConfigError::Validation("logging.level must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = load_config_with(None::<&Path>, env(&[])).unwrap();
        assert_eq!(cfg, QueueConfig::default());
        assert_eq!(cfg.normal_pool, PoolConfig { workers: 5, queue_depth: 10 });
        assert_eq!(cfg.compensation_pool, PoolConfig { workers: 2, queue_depth: 5 });
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.shutdown, ShutdownMode::Drain);
    }

    #[test]
    fn file_then_env_precedence() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
shutdown = "abandon"

[normal_pool]
workers = 8

[retry]
base_delay_ms = 100
jitter_ms = 0

[logging]
json = true
"#
        )
        .unwrap();

        let cfg = load_config_with(
            Some(file.path()),
            env(&[("BACKSTOP_NORMAL_WORKERS", "12"), ("BACKSTOP_LOG_LEVEL", "debug")]),
        )
        .unwrap();

        assert_eq!(cfg.normal_pool.workers, 12);
        assert_eq!(cfg.normal_pool.queue_depth, 10);
        assert_eq!(cfg.retry.base_delay_ms, 100);
        assert_eq!(cfg.retry.jitter_ms, 0);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.shutdown, ShutdownMode::Abandon);
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn env_shutdown_and_bool_parsing() {
        let mut cfg = QueueConfig::default();
        apply_env_overrides_from(
            &mut cfg,
            env(&[("BACKSTOP_SHUTDOWN", "Abandon"), ("BACKSTOP_LOG_JSON", "yes")]),
        )
        .unwrap();
        assert_eq!(cfg.shutdown, ShutdownMode::Abandon);
        assert!(cfg.logging.json);
    }

    #[test]
    fn malformed_env_value_is_a_parse_error() {
        let mut cfg = QueueConfig::default();
        let err = apply_env_overrides_from(&mut cfg, env(&[("BACKSTOP_MAX_ATTEMPTS", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(msg) if msg.contains("BACKSTOP_MAX_ATTEMPTS")));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[normal_pool\nworkers = ").unwrap();
        let err = load_config_with(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = load_config_with(None::<&Path>, env(&[("BACKSTOP_COMPENSATION_WORKERS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("compensation_pool.workers")));

        let err = load_config_with(None::<&Path>, env(&[("BACKSTOP_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config_with(Some("/definitely/not/here.toml"), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
