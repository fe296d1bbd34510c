//! Configuration for the registry and the item service.
//!
//! Both structs deserialize with every field optional, so an embedding
//! application can load them from whatever format it already uses:
//!
//! ```
//! use keyed_section::RegistryConfig;
//!
//! let cfg: RegistryConfig = serde_json::from_str(r#"{ "shard_count": 4 }"#).unwrap();
//! assert_eq!(cfg.shard_count, 4);
//! assert_eq!(cfg.wait_timeout(), None);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Largest accepted `shard_count`.
pub const MAX_SHARD_COUNT: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Number of independently locked map partitions. Rounded up to a
    /// power of two when the registry is built.
    pub shard_count: usize,

    /// Default bound for `run_bounded`. `None` waits indefinitely.
    pub wait_timeout_ms: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            wait_timeout_ms: None,
        }
    }
}

impl RegistryConfig {
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::Config("shard_count must be at least 1".into()));
        }
        if self.shard_count > MAX_SHARD_COUNT {
            return Err(Error::Config(format!(
                "shard_count {} exceeds the maximum of {}",
                self.shard_count, MAX_SHARD_COUNT
            )));
        }
        Ok(())
    }

    /// Shard count actually used: the configured value rounded up to a
    /// power of two.
    pub(crate) fn effective_shard_count(&self) -> usize {
        self.shard_count.max(1).next_power_of_two()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub registry: RegistryConfig,
}
