//! Queue configuration, deserializable from TOML.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::RetryPolicy;
use crate::error::ConfigError;

/// Upper bound of `ack_timeout_ms` and `lock_ttl_seconds`.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("name pattern must compile"));

/// Configuration of one queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub queue_name: String,
    /// Namespace of the dead letter records. Defaults to `queue_name`.
    pub dead_letter_queue_name: Option<String>,
    pub ack_timeout_ms: u64,
    /// Age after which a claim marker left behind by a crashed poller is
    /// released by `retry()`.
    pub lock_ttl_seconds: i64,
    pub schema_version: u32,
    pub retries: RetriesConfig,
}

/// Store call retry settings, split by read and write paths.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetriesConfig {
    pub transactions: RetrySettings,
    pub reads: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "default".to_string(),
            dead_letter_queue_name: None,
            ack_timeout_ms: 120_000,
            lock_ttl_seconds: 20,
            schema_version: 1,
            retries: RetriesConfig::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 100,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

impl QueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Rejects configurations that would leave table scoping undefined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("queue_name", &self.queue_name)?;
        if let Some(dlq) = &self.dead_letter_queue_name {
            validate_name("dead_letter_queue_name", dlq)?;
        }
        if self.lock_ttl_seconds <= 0 {
            return Err(ConfigError::NonPositiveLockTtl(self.lock_ttl_seconds));
        }
        if self.lock_ttl_seconds.unsigned_abs() > MAX_TIMEOUT.as_secs() {
            return Err(ConfigError::TimeoutTooLarge {
                field: "lock_ttl_seconds",
                max: MAX_TIMEOUT,
            });
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ZeroAckTimeout);
        }
        if u128::from(self.ack_timeout_ms) > MAX_TIMEOUT.as_millis() {
            return Err(ConfigError::TimeoutTooLarge {
                field: "ack_timeout_ms",
                max: MAX_TIMEOUT,
            });
        }
        if self.schema_version == 0 {
            return Err(ConfigError::ZeroSchemaVersion);
        }
        if self.retries.transactions.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts("transactions"));
        }
        if self.retries.reads.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts("reads"));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds.max(0) as u64)
    }

    pub fn namespace(&self) -> QueueNamespace {
        QueueNamespace {
            queue_name: self.queue_name.clone(),
            dead_letter_queue_name: self
                .dead_letter_queue_name
                .clone()
                .unwrap_or_else(|| self.queue_name.clone()),
            schema_version: self.schema_version,
        }
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if NAME_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        })
    }
}

/// Scope of every store operation.
///
/// Names end up in table names. `validate` must pass before any SQL is built
/// from them; `QueueConfig::validate` and `SqliteStore` both enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueNamespace {
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    pub schema_version: u32,
}

impl QueueNamespace {
    /// Both names match `^\w+$` and the schema version is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("queue_name", &self.queue_name)?;
        validate_name("dead_letter_queue_name", &self.dead_letter_queue_name)?;
        if self.schema_version == 0 {
            return Err(ConfigError::ZeroSchemaVersion);
        }
        Ok(())
    }

    pub fn queue_table(&self) -> String {
        format!("hopper_v{}_queue_{}", self.schema_version, self.queue_name)
    }

    pub fn unacked_table(&self) -> String {
        format!("hopper_v{}_unacked_{}", self.schema_version, self.queue_name)
    }

    pub fn messages_table(&self) -> String {
        format!("hopper_v{}_messages_{}", self.schema_version, self.queue_name)
    }

    pub fn dead_table(&self) -> String {
        format!(
            "hopper_v{}_dead_{}",
            self.schema_version, self.dead_letter_queue_name
        )
    }
}

impl Default for QueueNamespace {
    fn default() -> Self {
        QueueConfig::default().namespace()
    }
}
