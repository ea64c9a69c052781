// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::persistence::json_file::{JsonFileDatabase, JsonFilePersister};
use crate::persistence::schema::{
    PERSISTED_STATE_VERSION, PersistedStateV1, PersistedStatesV1, REGISTRY_SCOPE, STATES_KEY,
    SchemaVersion,
};
use crate::registry::Registry;

/// Loads and writes registry snapshots through a [`JsonFilePersister`].
///
/// Keeps the last persisted view in memory, so single rows can be dropped
/// (see [`StateStore::forget`]) without taking a new snapshot of the registry.
pub struct StateStore {
    persister: JsonFilePersister,
    persisted: PersistedStatesV1,
}

impl StateStore {
    pub fn new(persister: JsonFilePersister) -> Self {
        Self {
            persister,
            persisted: PersistedStatesV1::default(),
        }
    }

    /// Open the registry file at `path`, creating it on first checkpoint
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = JsonFileDatabase::open(path)?;
        Ok(Self::new(db.persister(REGISTRY_SCOPE)))
    }

    /// Load the persisted states into `registry`, replacing its contents.
    ///
    /// A missing registry file or key is a fresh start and leaves `registry`
    /// as it is. State that exists but cannot be decoded is an error: silently
    /// starting over would re-read or skip data for every tracked file.
    pub fn restore(&mut self, registry: &Registry) -> Result<usize> {
        self.persister.load()?;

        let version = self
            .persister
            .try_get_raw_json::<SchemaVersion>(STATES_KEY)
            .map_err(|e| Error::Corrupted(format!("unreadable registry state: {}", e)))?;

        let Some(SchemaVersion { version }) = version else {
            debug!("No persisted registry state found, starting fresh");
            self.persisted = PersistedStatesV1::default();
            return Ok(0);
        };

        if version != PERSISTED_STATE_VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported registry state version {} (expected {})",
                version, PERSISTED_STATE_VERSION
            )));
        }

        let persisted = self
            .persister
            .try_get_raw_json::<PersistedStatesV1>(STATES_KEY)
            .map_err(|e| Error::Corrupted(format!("unreadable registry state: {}", e)))?
            .unwrap_or_default();

        let count = persisted.states.len();
        registry.set_states(persisted.clone().into_records());
        self.persisted = persisted;

        info!("Restored {} file states from registry", count);
        Ok(count)
    }

    /// Drop one persisted row. Takes effect on disk at the next
    /// [`StateStore::sync`] or [`StateStore::checkpoint`].
    ///
    /// Does no I/O, so it is safe to call from a cleanup callback.
    pub fn forget(&mut self, id: &str) -> bool {
        self.persisted.states.remove(id).is_some()
    }

    /// Write the current persisted view to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.persister.set_raw_json(STATES_KEY, &self.persisted)?;
        self.persister.sync()
    }

    /// Replace the persisted view with a snapshot of `registry` and write it.
    pub fn checkpoint(&mut self, registry: &Registry) -> Result<usize> {
        self.persisted = PersistedStatesV1::from_records(&registry.get_states());
        self.sync()?;

        let count = self.persisted.states.len();
        debug!("Checkpoint completed with {} states", count);
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&PersistedStateV1> {
        self.persisted.states.get(id)
    }

    pub fn len(&self) -> usize {
        self.persisted.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persisted.states.is_empty()
    }
}
