// SPDX-License-Identifier: Apache-2.0

//! Persistence schema for the registry file.
//!
//! The registry is stored under [`STATES_KEY`] as a versioned object keyed by
//! state id, so a single row can be dropped without rewriting its neighbours'
//! identities and the file stays readable by hand.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{StateRecord, Ttl};

/// Scope used for registry state inside the database file
pub const REGISTRY_SCOPE: &str = "registry";

/// Key used to store the state collection in the persister
pub const STATES_KEY: &str = "states";

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Only the version field, read before committing to a full decode
#[derive(Debug, Deserialize)]
pub struct SchemaVersion {
    #[serde(default)]
    pub version: u8,
}

/// Persisted state collection (v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStatesV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    /// Map from state id to its persisted entry
    pub states: BTreeMap<String, PersistedStateV1>,
}

impl Default for PersistedStatesV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            states: BTreeMap::new(),
        }
    }
}

impl PersistedStatesV1 {
    pub fn from_records(records: &[StateRecord]) -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            states: records
                .iter()
                .map(|r| (r.id.clone(), PersistedStateV1::from(r)))
                .collect(),
        }
    }

    pub fn into_records(self) -> Vec<StateRecord> {
        self.states
            .into_iter()
            .map(|(id, entry)| entry.into_record(id))
            .collect()
    }
}

/// Persisted state for a single source (v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    /// Last known path, for user visibility
    pub source: String,
    /// Resume position in bytes
    pub offset: u64,
    /// Time of the last update
    pub timestamp: DateTime<Utc>,
    /// "never", "0s", or a humantime duration such as "1h 30m"
    pub ttl: Ttl,
    pub finished: bool,
}

impl PersistedStateV1 {
    pub fn into_record(self, id: String) -> StateRecord {
        StateRecord {
            id,
            source: self.source,
            offset: self.offset,
            timestamp: self.timestamp,
            ttl: self.ttl,
            finished: self.finished,
        }
    }
}

impl From<&StateRecord> for PersistedStateV1 {
    fn from(r: &StateRecord) -> Self {
        Self {
            source: r.source.clone(),
            offset: r.offset,
            timestamp: r.timestamp,
            ttl: r.ttl,
            finished: r.finished,
        }
    }
}
