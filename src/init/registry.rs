// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::RegistryConfig;

#[derive(Debug, Args, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryArgs {
    /// Path of the registry file used to resume files across restarts
    #[arg(
        long,
        env = "FILESTATE_REGISTRY_PATH",
        default_value = "/var/lib/filestate/registry.json"
    )]
    pub registry_path: PathBuf,

    /// Interval in milliseconds between removals of finished, expired file states
    #[arg(
        long,
        env = "FILESTATE_REGISTRY_CLEANUP_INTERVAL_MS",
        default_value = "10000"
    )]
    pub registry_cleanup_interval_ms: u64,

    /// Interval in milliseconds between writes of the registry file
    #[arg(
        long,
        env = "FILESTATE_REGISTRY_CHECKPOINT_INTERVAL_MS",
        default_value = "1000"
    )]
    pub registry_checkpoint_interval_ms: u64,

    /// Maximum duration in milliseconds of consecutive checkpoint failures before exiting
    #[arg(
        long,
        env = "FILESTATE_REGISTRY_MAX_CHECKPOINT_FAILURE_DURATION_MS",
        default_value = "60000"
    )]
    pub registry_max_checkpoint_failure_duration_ms: u64,
}

impl Default for RegistryArgs {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("/var/lib/filestate/registry.json"),
            registry_cleanup_interval_ms: 10000,
            registry_checkpoint_interval_ms: 1000,
            registry_max_checkpoint_failure_duration_ms: 60000,
        }
    }
}

impl RegistryArgs {
    /// Build the registry config from command line args
    pub fn build_config(&self) -> RegistryConfig {
        RegistryConfig {
            states_path: self.registry_path.clone(),
            cleanup_interval: Duration::from_millis(self.registry_cleanup_interval_ms),
            checkpoint_interval: Duration::from_millis(self.registry_checkpoint_interval_ms),
            max_checkpoint_failure_duration: Duration::from_millis(
                self.registry_max_checkpoint_failure_duration_ms,
            ),
        }
    }
}
