//! Catalog and state types for mesh devices and groups
//!
//! Devices and groups share one 16-bit address space on the mesh. Address 0
//! is the broadcast target; groups occupy the low range and devices the high
//! range, so auto-assignment can hand out ids without collisions.

use serde::{Deserialize, Serialize};

/// Mesh address of a device or group (0 = broadcast)
pub type AvionId = u16;

/// The two GATT characteristics the bridge exposes for mesh traffic
///
/// Mesh packets are split across a low and a high value handle; both carry
/// outbound writes and inbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Low-half characteristic
    Low,
    /// High-half characteristic
    High,
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Characteristic::Low => write!(f, "low"),
            Characteristic::High => write!(f, "high"),
        }
    }
}

/// Broadcast / unaddressed target
pub const BROADCAST_ID: AvionId = 0;

/// First id available for auto-assigned groups
pub const MIN_GROUP_ID: AvionId = 256;

/// Last id available for auto-assigned groups
pub const MAX_GROUP_ID: AvionId = 24575;

/// First id available for auto-assigned devices
pub const MIN_DEVICE_ID: AvionId = 32896;

/// Last id available for auto-assigned devices
pub const MAX_DEVICE_ID: AvionId = 65407;

/// A claimed device in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Mesh address
    pub avion_id: AvionId,
    /// Product type (capability lookup key, see [`crate::product`])
    pub product_type: u8,
    /// Display name
    pub name: String,
    /// Groups this device belongs to
    #[serde(default)]
    pub groups: Vec<AvionId>,
}

impl DeviceEntry {
    /// Create a device entry with no group memberships
    pub fn new(avion_id: AvionId, product_type: u8, name: impl Into<String>) -> Self {
        Self {
            avion_id,
            product_type,
            name: name.into(),
            groups: Vec::new(),
        }
    }
}

/// A group of devices controlled as one light
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Mesh address
    pub group_id: AvionId,
    /// Display name
    pub name: String,
    /// Member device ids
    #[serde(default)]
    pub member_ids: Vec<AvionId>,
}

impl GroupEntry {
    /// Create an empty group
    pub fn new(group_id: AvionId, name: impl Into<String>) -> Self {
        Self {
            group_id,
            name: name.into(),
            member_ids: Vec::new(),
        }
    }
}

/// Last-known light state for a device or group
///
/// Fields start unknown and become known either optimistically (when the hub
/// issues a command) or from a status frame off the mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Brightness 0-255
    pub brightness: u8,
    /// Color temperature in kelvin
    pub color_temp: u16,
    /// Whether `brightness` has ever been set
    pub brightness_known: bool,
    /// Whether `color_temp` has ever been set
    pub color_temp_known: bool,
}

impl DeviceState {
    /// Record a brightness value
    pub fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness;
        self.brightness_known = true;
    }

    /// Record a color temperature in kelvin
    pub fn set_color_temp(&mut self, kelvin: u16) {
        self.color_temp = kelvin;
        self.color_temp_known = true;
    }
}

/// A device that answered a broadcast discovery ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Mesh address the response came from
    pub device_id: AvionId,
    /// Firmware version triple
    pub fw_major: u8,
    /// Firmware version triple
    pub fw_minor: u8,
    /// Firmware version triple
    pub fw_patch: u8,
    /// Device flag bits
    pub flags: u8,
    /// Vendor identifier
    pub vendor_id: u16,
    /// Vendor-assigned product identifier
    pub product_id: u8,
}

impl DiscoveredDevice {
    /// Firmware version as a display string
    pub fn fw_version(&self) -> String {
        format!("{}.{}.{}", self.fw_major, self.fw_minor, self.fw_patch)
    }
}
