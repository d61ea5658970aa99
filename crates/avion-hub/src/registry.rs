//! Durable catalog of claimed devices and groups
//!
//! Every mutating operation keeps both sides of the device/group membership
//! relation consistent and persists the full snapshot before returning.
//! Lookups are linear scans; the catalog tops out at tens of entries.

use rand::RngCore;
use tracing::warn;

use avion_core::{
    AvionId, DeviceEntry, DiscoveredDevice, GroupEntry, MAX_DEVICE_ID, MAX_GROUP_ID, MIN_DEVICE_ID,
    MIN_GROUP_ID,
};

use crate::storage::{RegistrySnapshot, Storage};

/// Devices, groups, and the mesh passphrase, with write-through persistence
pub struct DeviceRegistry {
    devices: Vec<DeviceEntry>,
    groups: Vec<GroupEntry>,
    passphrase: String,
    store: Box<dyn Storage>,
}

impl DeviceRegistry {
    /// Create a registry over a storage backend and load what it holds
    pub fn load(mut store: Box<dyn Storage>) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to load registry snapshot: {e}");
                RegistrySnapshot::default()
            }
        };
        Self {
            devices: snapshot.devices,
            groups: snapshot.groups,
            passphrase: snapshot.passphrase,
            store,
        }
    }

    /// Claimed devices
    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    /// Groups
    pub fn groups(&self) -> &[GroupEntry] {
        &self.groups
    }

    /// Configured mesh passphrase (empty = none)
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Look up a device by id
    pub fn find_device(&self, avion_id: AvionId) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.avion_id == avion_id)
    }

    /// Look up a group by id
    pub fn find_group(&self, group_id: AvionId) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| g.group_id == group_id)
    }

    /// Add a device; `false` if the id is already claimed
    pub fn add_device(&mut self, avion_id: AvionId, product_type: u8, name: &str) -> bool {
        if self.find_device(avion_id).is_some() {
            return false;
        }
        self.devices
            .push(DeviceEntry::new(avion_id, product_type, name));
        self.persist();
        true
    }

    /// Remove a device and scrub it from every group's member list
    pub fn remove_device(&mut self, avion_id: AvionId) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.avion_id != avion_id);
        if self.devices.len() == before {
            return false;
        }
        for group in &mut self.groups {
            group.member_ids.retain(|&id| id != avion_id);
        }
        self.persist();
        true
    }

    /// Add a group; `false` if the id is already taken
    pub fn add_group(&mut self, group_id: AvionId, name: &str) -> bool {
        if self.find_group(group_id).is_some() {
            return false;
        }
        self.groups.push(GroupEntry::new(group_id, name));
        self.persist();
        true
    }

    /// Remove a group and scrub it from every device's membership list
    pub fn remove_group(&mut self, group_id: AvionId) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g.group_id != group_id);
        if self.groups.len() == before {
            return false;
        }
        for device in &mut self.devices {
            device.groups.retain(|&id| id != group_id);
        }
        self.persist();
        true
    }

    /// Record a membership on both sides; idempotent
    pub fn add_device_to_group(&mut self, avion_id: AvionId, group_id: AvionId) -> bool {
        if self.find_device(avion_id).is_none() || self.find_group(group_id).is_none() {
            return false;
        }

        for device in &mut self.devices {
            if device.avion_id == avion_id && !device.groups.contains(&group_id) {
                device.groups.push(group_id);
            }
        }
        for group in &mut self.groups {
            if group.group_id == group_id && !group.member_ids.contains(&avion_id) {
                group.member_ids.push(avion_id);
            }
        }

        self.persist();
        true
    }

    /// Erase a membership from both sides
    pub fn remove_device_from_group(&mut self, avion_id: AvionId, group_id: AvionId) -> bool {
        if self.find_device(avion_id).is_none() || self.find_group(group_id).is_none() {
            return false;
        }

        for device in &mut self.devices {
            if device.avion_id == avion_id {
                device.groups.retain(|&id| id != group_id);
            }
        }
        for group in &mut self.groups {
            if group.group_id == group_id {
                group.member_ids.retain(|&id| id != avion_id);
            }
        }

        self.persist();
        true
    }

    /// First device id not in the catalog nor among recently discovered ids
    pub fn next_device_id(&self, discovered: &[DiscoveredDevice]) -> Option<AvionId> {
        (MIN_DEVICE_ID..=MAX_DEVICE_ID).find(|&id| {
            self.find_device(id).is_none() && !discovered.iter().any(|d| d.device_id == id)
        })
    }

    /// First free group id
    pub fn next_group_id(&self) -> Option<AvionId> {
        (MIN_GROUP_ID..=MAX_GROUP_ID).find(|&id| self.find_group(id).is_none())
    }

    /// Replace the mesh passphrase and persist
    pub fn set_passphrase(&mut self, passphrase: &str) {
        self.passphrase = passphrase.to_string();
        self.persist();
    }

    /// Generate a fresh random passphrase (16 bytes, base58) and persist
    pub fn generate_passphrase(&mut self) -> &str {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        self.passphrase = bs58::encode(raw).into_string();
        self.persist();
        &self.passphrase
    }

    /// Drop everything, including the stored snapshot
    pub fn clear(&mut self) {
        self.devices.clear();
        self.groups.clear();
        self.passphrase.clear();
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear registry storage: {e}");
        }
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            devices: self.devices.clone(),
            groups: self.groups.clone(),
            passphrase: self.passphrase.clone(),
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Failed to persist registry snapshot: {e}");
        }
    }
}
