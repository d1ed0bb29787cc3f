//! Queue configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::OperationOptions;

/// Configuration for a transfer scheduler.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct QueueConfig {
    /// Operations allowed to run at the same time.
    #[builder(default = "3")]
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,

    /// Idle back-off of the scheduling loop, in milliseconds.
    #[builder(default = "100")]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Speed limit shared by every operation, in bytes per second.
    #[builder(default)]
    #[serde(default)]
    pub global_speed_limit: Option<u64>,

    /// Buffered events per subscriber before old ones are dropped.
    #[builder(default = "1024")]
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Read/write chunk used by the local executors.
    #[builder(default = "256 * 1024")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Options applied to submissions that don't carry their own.
    #[builder(default)]
    #[serde(default)]
    pub default_options: OperationOptions,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_event_capacity() -> usize {
    1024
}

fn default_chunk_size() -> usize {
    256 * 1024
}

impl QueueConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_transfers == Some(0) {
            return Err("max_concurrent_transfers must be at least 1".to_string());
        }
        if self.poll_interval_ms == Some(0) {
            return Err("poll_interval_ms must be at least 1".to_string());
        }
        if self.event_capacity == Some(0) {
            return Err("event_capacity must be at least 1".to_string());
        }
        if self.chunk_size == Some(0) {
            return Err("chunk_size must be at least 1".to_string());
        }
        Ok(())
    }
}

impl QueueConfig {
    /// Create a new queue config builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Clamp values that would stall the scheduler (e.g. from a hand-edited file).
    pub fn sanitized(mut self) -> Self {
        self.max_concurrent_transfers = self.max_concurrent_transfers.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self.chunk_size = self.chunk_size.max(1);
        self.global_speed_limit = self.global_speed_limit.filter(|limit| *limit > 0);
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
            global_speed_limit: None,
            event_capacity: default_event_capacity(),
            chunk_size: default_chunk_size(),
            default_options: OperationOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::builder()
            .max_concurrent_transfers(1usize)
            .global_speed_limit(Some(1_048_576u64))
            .build()
            .unwrap();

        assert_eq!(config.max_concurrent_transfers, 1);
        assert_eq!(config.global_speed_limit, Some(1_048_576));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.chunk_size, 256 * 1024);
    }

    #[test]
    fn test_config_rejects_zero_concurrency() {
        let result = QueueConfig::builder().max_concurrent_transfers(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_zero_poll_interval() {
        let result = QueueConfig::builder().poll_interval_ms(0u64).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_sanitized() {
        let config = QueueConfig {
            max_concurrent_transfers: 0,
            poll_interval_ms: 0,
            global_speed_limit: Some(0),
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.max_concurrent_transfers, 1);
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert!(config.global_speed_limit.is_none());
    }
}
