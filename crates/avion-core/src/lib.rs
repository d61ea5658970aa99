//! Avion Core - Foundational types for the AvionMesh lighting hub
//!
//! This crate provides the domain types shared by the bridge, mesh session,
//! and hub crates:
//!
//! - [`types`] - Device and group catalog entries, cached light state,
//!   discovered-device records, identifier ranges
//! - [`product`] - Product-type capability lookups (dimming, color
//!   temperature, display names)
//!
//! Everything here is plain data; the behavior lives in `avion-bridge`,
//! `avion-mesh`, and `avion-hub`.

pub mod product;
pub mod types;

pub use product::{has_color_temp, has_dimming, product_name};
pub use types::{
    AvionId, Characteristic, DeviceEntry, DeviceState, DiscoveredDevice, GroupEntry, BROADCAST_ID,
    MAX_DEVICE_ID, MAX_GROUP_ID, MIN_DEVICE_ID, MIN_GROUP_ID,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
