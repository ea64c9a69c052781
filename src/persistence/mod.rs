// SPDX-License-Identifier: Apache-2.0

//! Durable storage for registry snapshots.
//!
//! Uses a JSON registry file with atomic writes. The registry itself never
//! touches disk: [`StateStore`] snapshots it with `get_states` and restores it
//! with `set_states`.

mod json_file;
mod schema;
mod store;

pub use json_file::{JsonFileDatabase, JsonFilePersister};
pub use schema::{
    PERSISTED_STATE_VERSION, PersistedStateV1, PersistedStatesV1, REGISTRY_SCOPE, STATES_KEY,
};
pub use store::StateStore;
