//! Snapshot storage backends for the device registry
//!
//! The registry persists its whole state on every mutation (write-through,
//! no batching), so the backend contract is deliberately tiny: load one
//! snapshot, save one snapshot, clear. The JSON file backend writes through
//! a temp file and renames so a crash never leaves a torn snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use avion_core::{DeviceEntry, GroupEntry};

use crate::error::Result;

/// Complete persisted registry state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Claimed devices
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    /// Groups
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    /// Mesh passphrase (empty = not configured)
    #[serde(default)]
    pub passphrase: String,
}

/// Persistence backend for registry snapshots
pub trait Storage: Send {
    /// Load the stored snapshot; a missing store yields the default
    fn load(&mut self) -> Result<RegistrySnapshot>;

    /// Replace the stored snapshot
    fn save(&mut self, snapshot: &RegistrySnapshot) -> Result<()>;

    /// Erase the store entirely
    fn clear(&mut self) -> Result<()>;
}

/// JSON-file snapshot store
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Create a store backed by the given file path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl Storage for JsonStore {
    fn load(&mut self) -> Result<RegistrySnapshot> {
        if !self.path.exists() {
            return Ok(RegistrySnapshot::default());
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&mut self, snapshot: &RegistrySnapshot) -> Result<()> {
        let data = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            "Saved registry snapshot: {} devices, {} groups",
            snapshot.devices.len(),
            snapshot.groups.len()
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-memory snapshot store for tests
///
/// The snapshot lives behind a shared handle so tests can inspect what the
/// registry actually persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    snapshot: std::sync::Arc<parking_lot::Mutex<Option<RegistrySnapshot>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// What was last saved, if anything
    pub fn saved(&self) -> Option<RegistrySnapshot> {
        self.snapshot.lock().clone()
    }
}

impl Storage for MemoryStore {
    fn load(&mut self) -> Result<RegistrySnapshot> {
        Ok(self.snapshot.lock().clone().unwrap_or_default())
    }

    fn save(&mut self, snapshot: &RegistrySnapshot) -> Result<()> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        *self.snapshot.lock() = None;
        Ok(())
    }
}
