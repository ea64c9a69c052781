// SPDX-License-Identifier: Apache-2.0

//! Periodic cleanup and checkpointing of the file-state registry.
//!
//! The housekeeper runs as its own task next to the harvesters. On one
//! interval it removes finished, expired states (dropping their persisted rows
//! as it goes); on another it writes a snapshot of the registry to disk. On
//! shutdown it runs one last cleanup and checkpoint.

use std::sync::Arc;
use std::time::Instant;

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::persistence::StateStore;
use crate::registry::{CleanupStats, Registry};

pub struct Housekeeper {
    registry: Arc<Registry>,
    store: StateStore,
    config: RegistryConfig,
    /// Tracks when checkpoint failures started (for threshold-based exit)
    checkpoint_first_failure: Option<Instant>,
}

impl Housekeeper {
    pub fn new(registry: Arc<Registry>, store: StateStore, config: RegistryConfig) -> Self {
        Self {
            registry,
            store,
            config,
            checkpoint_first_failure: None,
        }
    }

    /// Open the configured registry file and load it into `registry`.
    pub fn restore(registry: Arc<Registry>, config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let mut store = StateStore::open(&config.states_path)?;
        store.restore(&registry)?;

        Ok(Self::new(registry, store, config))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run until cancelled.
    ///
    /// Returns an error if checkpoint failures persist beyond the configured
    /// threshold. The final checkpoint on shutdown is attempted either way.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<()> {
        info!("Registry housekeeping started");

        let mut checkpoint_interval = tokio::time::interval(self.config.checkpoint_interval);
        checkpoint_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_interval = tokio::time::interval(self.config.cleanup_interval);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut fatal_error = None;

        loop {
            select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!("Registry housekeeping cancelled");
                    break;
                }

                _ = cleanup_interval.tick() => {
                    self.cleanup();
                }

                _ = checkpoint_interval.tick() => {
                    if let Err(e) = self.maybe_checkpoint() {
                        error!("Checkpoint failures persisted beyond threshold, exiting: {}", e);
                        fatal_error = Some(e);
                        break;
                    }
                }
            }
        }

        self.cleanup();
        match self.checkpoint() {
            Ok(count) => info!("Final registry checkpoint completed with {} states", count),
            Err(e) => warn!("Failed to perform final registry checkpoint: {}", e),
        }

        match fatal_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove finished, expired states and drop their persisted rows.
    pub fn cleanup(&mut self) -> CleanupStats {
        let store = &mut self.store;
        let stats = self.registry.cleanup_with(|id| {
            store.forget(id);
        });

        if stats.removed > 0 {
            info!(
                removed = stats.removed,
                pending = stats.pending,
                "Removed finished file states"
            );
            // Outside the registry lock; a failure here is retried by the next checkpoint
            if let Err(e) = self.store.sync() {
                warn!("Failed to write registry after cleanup: {}", e);
            }
        } else {
            debug!(pending = stats.pending, "Registry cleanup removed nothing");
        }

        stats
    }

    /// Write a snapshot of the registry to disk.
    pub fn checkpoint(&mut self) -> Result<usize> {
        self.store.checkpoint(&self.registry)
    }

    /// Checkpoint and track failures.
    /// Returns Err only once failures have lasted past the configured threshold.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        match self.checkpoint() {
            Ok(_) => {
                if self.checkpoint_first_failure.is_some() {
                    debug!("Checkpoint succeeded after previous failures");
                    self.checkpoint_first_failure = None;
                }
                Ok(())
            }
            Err(e) => {
                let first_failure = *self
                    .checkpoint_first_failure
                    .get_or_insert_with(Instant::now);

                let failure_duration = first_failure.elapsed();

                if failure_duration >= self.config.max_checkpoint_failure_duration {
                    Err(e)
                } else {
                    warn!(
                        "Checkpoint failed (failures started {:?} ago): {}",
                        failure_duration, e
                    );
                    Ok(())
                }
            }
        }
    }
}
