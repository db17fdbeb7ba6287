//! Event store tunables.
//!
//! # Responsibility
//! - Carry every window, threshold and limit used by the coordinator and
//!   notifier in one serializable struct.
//! - Accept partial JSON documents; missing keys keep their defaults.
//!
//! # Invariants
//! - A validated config never has a zero threshold, limit or capacity.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SOURCE_TAG: &str = "event-store-notify";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value `{field}`: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Minimum gap between remote list queries for one scope.
    pub refresh_interval_ms: u64,
    /// How long a finished request keeps its in-flight key blocked.
    pub guard_release_ms: u64,
    /// Upper bound on how long an unfinished request may hold its key.
    pub guard_lease_ms: u64,
    /// Consecutive empty list results before the breaker opens.
    pub empty_result_threshold: u32,
    pub breaker_base_backoff_ms: u64,
    pub breaker_max_backoff_ms: u64,
    pub notify_debounce_ms: u64,
    pub notify_history_limit: usize,
    /// `limit` passed to `query_by_owner`.
    pub query_limit: u32,
    pub broadcast_capacity: usize,
    /// Tag stamped on broadcast messages so receivers can skip their own.
    pub source_tag: String,
    pub default_lookback_days: i64,
    pub default_lookahead_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5_000,
            guard_release_ms: 500,
            guard_lease_ms: 30_000,
            empty_result_threshold: 3,
            breaker_base_backoff_ms: 10_000,
            breaker_max_backoff_ms: 300_000,
            notify_debounce_ms: 2_000,
            notify_history_limit: 100,
            query_limit: 200,
            broadcast_capacity: 64,
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            default_lookback_days: 365,
            default_lookahead_days: 730,
        }
    }
}

impl StoreConfig {
    /// Parses a (possibly partial) JSON document and validates it.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.empty_result_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "empty_result_threshold",
                reason: "must be at least 1",
            });
        }
        if self.notify_history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "notify_history_limit",
                reason: "must be at least 1",
            });
        }
        if self.query_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "query_limit",
                reason: "must be at least 1",
            });
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broadcast_capacity",
                reason: "must be at least 1",
            });
        }
        if self.breaker_max_backoff_ms < self.breaker_base_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "breaker_max_backoff_ms",
                reason: "must not be lower than breaker_base_backoff_ms",
            });
        }
        if self.source_tag.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source_tag",
                reason: "cannot be empty",
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        millis(self.refresh_interval_ms)
    }

    pub fn guard_release(&self) -> Duration {
        millis(self.guard_release_ms)
    }

    pub fn guard_lease(&self) -> Duration {
        millis(self.guard_lease_ms)
    }

    pub fn breaker_base_backoff(&self) -> Duration {
        millis(self.breaker_base_backoff_ms)
    }

    pub fn breaker_max_backoff(&self) -> Duration {
        millis(self.breaker_max_backoff_ms)
    }

    pub fn notify_debounce(&self) -> Duration {
        millis(self.notify_debounce_ms)
    }
}

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}
