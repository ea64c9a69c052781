// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file-state registry and its housekeeping task.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for registry persistence and cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Path of the JSON registry file
    pub states_path: PathBuf,
    /// Interval between cleanup passes
    pub cleanup_interval: Duration,
    /// Interval between checkpoints of the registry to disk
    pub checkpoint_interval: Duration,
    /// Maximum duration of consecutive checkpoint failures before giving up
    pub max_checkpoint_failure_duration: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            states_path: PathBuf::from("/var/lib/filestate/registry.json"),
            cleanup_interval: Duration::from_secs(10),
            checkpoint_interval: Duration::from_secs(1),
            max_checkpoint_failure_duration: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.states_path.as_os_str().is_empty() {
            return Err(Error::Config("registry states path must be set".to_string()));
        }

        // tokio intervals panic on a zero period
        if self.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        if self.checkpoint_interval.is_zero() {
            return Err(Error::Config(
                "checkpoint interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
