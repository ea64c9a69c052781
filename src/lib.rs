// SPDX-License-Identifier: Apache-2.0

//! File-state registry for log tailing.
//!
//! Tracks per-file read progress so a tailing agent can resume each file where
//! it left off after a restart, and reclaims state for files that are finished
//! and past their TTL.
//!
//! - [`registry`]: the thread-safe in-memory registry
//! - [`persistence`]: JSON registry file, snapshot and restore
//! - [`housekeeping`]: periodic cleanup and checkpoint task

pub mod config;
pub mod error;
pub mod housekeeping;
pub mod init;
pub mod logging;
pub mod persistence;
pub mod registry;

pub use config::RegistryConfig;
pub use error::{Error, Result};
pub use housekeeping::Housekeeper;
pub use persistence::{JsonFileDatabase, JsonFilePersister, StateStore};
pub use registry::{CleanupStats, Registry, StateRecord, Ttl};
