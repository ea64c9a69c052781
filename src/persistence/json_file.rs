// SPDX-License-Identifier: Apache-2.0

//! JSON registry file with atomic writes.
//!
//! The file holds one JSON object per scope, each a map of keys to raw JSON
//! values. Writes go to a temp file that is then renamed over the target, so a
//! crash mid-write leaves the previous registry file intact.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    scopes: HashMap<String, HashMap<String, serde_json::Value>>,
}

/// A shared handle to one registry file.
#[derive(Clone)]
pub struct JsonFileDatabase {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
}

impl JsonFileDatabase {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }
            DatabaseState::default()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn open_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(DatabaseState::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a persister bound to one scope of this database
    pub fn persister(&self, scope: impl Into<String>) -> JsonFilePersister {
        JsonFilePersister {
            path: self.path.clone(),
            state: self.state.clone(),
            scope: scope.into(),
            cache: HashMap::new(),
        }
    }

    /// Write the current contents to disk
    pub fn flush(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        atomic_write(&self.path, &state)
    }
}

/// Key/value view of one scope in a [`JsonFileDatabase`].
///
/// Changes are staged in a local cache and only reach the shared database and
/// disk on [`JsonFilePersister::sync`].
pub struct JsonFilePersister {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
    scope: String,
    cache: HashMap<String, serde_json::Value>,
}

impl JsonFilePersister {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Stage a value, stored as plain JSON in the file
    pub fn set_raw_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.cache.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Get a value, or None if the key is missing or does not decode as `T`
    pub fn get_raw_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.try_get_raw_json(key).ok().flatten()
    }

    /// Get a value, distinguishing a missing key (`Ok(None)`) from one that
    /// fails to decode (`Err`)
    pub fn try_get_raw_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> std::result::Result<Option<T>, serde_json::Error> {
        match self.cache.get(key) {
            None => Ok(None),
            Some(v) => T::deserialize(v).map(Some),
        }
    }

    pub fn delete(&mut self, key: &str) {
        self.cache.remove(key);
    }

    /// Replace the cache with this scope's contents from the database
    pub fn load(&mut self) -> Result<()> {
        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        self.cache = state.scopes.get(&self.scope).cloned().unwrap_or_default();

        Ok(())
    }

    /// Publish the cache to the shared database and write it to disk
    pub fn sync(&self) -> Result<()> {
        {
            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Persistence(e.to_string()))?;

            state.scopes.insert(self.scope.clone(), self.cache.clone());
        }

        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        atomic_write(&self.path, &state)
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &DatabaseState) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    // Unique per process and per write, concurrent syncs must not share a temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_temp(&temp_path, state)
        .and_then(|()| fs::rename(&temp_path, path).map_err(Error::from));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp(temp_path: &Path, state: &DatabaseState) -> Result<()> {
    let mut writer = BufWriter::new(File::create(temp_path)?);
    serde_json::to_writer_pretty(&mut writer, state)?;
    writer.flush()?;
    // Data must be on disk before the rename makes it visible
    writer.get_ref().sync_all()?;
    Ok(())
}
