//! Tuning knobs for the producer, the resend scanner and the consumer engine.
//!
//! Every section has working defaults, so an empty document is a valid config:
//!
//! ```
//! use reliable_mq::config::ReliabilityConfig;
//!
//! let config = ReliabilityConfig::from_json_str(r#"{ "consumer": { "max_retries": 5 } }"#).unwrap();
//! assert_eq!(config.consumer.max_retries, 5);
//! assert_eq!(config.scanner.batch_size, 100);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outbox::{AckPolicy, ExchangeType};

/// Longest TTL accepted for dedup records and retry counters (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub producer: ProducerConfig,
    pub scanner: ScannerConfig,
    pub consumer: ConsumerConfig,
}

impl ReliabilityConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scanner.validate()?;
        self.consumer.validate()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// What happens to a row once its publish is confirmed.
    pub ack_policy: AckPolicy,
    /// Exchange type used when a send does not name one.
    pub exchange_type: ExchangeType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Pause between scan passes.
    pub interval_ms: u64,
    /// Rows fetched per page.
    pub batch_size: usize,
    /// Rows younger than this are left to the producer's own publish.
    pub min_age_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            batch_size: 100,
            min_age_ms: 0,
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_millis(self.min_age_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("scanner.interval_ms must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("scanner.batch_size must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Workers per queue. `None` uses the number of available processing units.
    pub concurrency: Option<usize>,
    /// Unacknowledged deliveries per worker.
    pub prefetch: usize,
    /// Failures tolerated before a message is rejected.
    pub max_retries: u32,
    pub dedup_ttl_secs: u64,
    /// `None` keeps retry counters forever.
    pub retry_counter_ttl_secs: Option<u64>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            prefetch: 1,
            max_retries: 3,
            dedup_ttl_secs: 60,
            retry_counter_ttl_secs: Some(24 * 60 * 60),
        }
    }
}

impl ConsumerConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn retry_counter_ttl(&self) -> Option<Duration> {
        self.retry_counter_ttl_secs.map(Duration::from_secs)
    }

    /// Worker count, resolving `None` to the available parallelism.
    pub fn resolved_concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(default_concurrency)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == Some(0) {
            return Err(ConfigError::Invalid("consumer.concurrency must be positive".into()));
        }
        if self.prefetch == 0 {
            return Err(ConfigError::Invalid("consumer.prefetch must be positive".into()));
        }
        if self.dedup_ttl_secs == 0 {
            return Err(ConfigError::Invalid("consumer.dedup_ttl_secs must be positive".into()));
        }
        if self.dedup_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "consumer.dedup_ttl_secs must be at most {MAX_TTL_SECS}"
            )));
        }
        if self.retry_counter_ttl_secs.is_some_and(|ttl| ttl == 0 || ttl > MAX_TTL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "consumer.retry_counter_ttl_secs must be between 1 and {MAX_TTL_SECS}"
            )));
        }
        Ok(())
    }
}

/// Number of available processing units, at least 1.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
