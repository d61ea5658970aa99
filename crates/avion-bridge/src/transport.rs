//! Transport collaborator trait and inbound event types
//!
//! The radio stack (scan/connect/GATT primitives) lives outside this crate.
//! Requests on [`Transport`] return as soon as the stack accepts them;
//! completions, inbound notifications, and link drops arrive later as
//! [`TransportEvent`]s on the control loop.

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// 16-bit service UUID advertised by mesh bridge devices
pub const MESH_SERVICE_UUID16: u16 = 0xFEF1;

/// 128-bit UUID of the low mesh characteristic
pub const CHAR_LOW_UUID: [u8; 16] = [
    0x00, 0x0b, 0x00, 0x5b, 0x02, 0x00, 0x03, 0x80, 0xe3, 0x11, 0xaf, 0x9d, 0x00, 0xc0, 0xed, 0xc4,
];

/// 128-bit UUID of the high mesh characteristic
pub const CHAR_HIGH_UUID: [u8; 16] = [
    0x00, 0x0b, 0x00, 0x5b, 0x02, 0x00, 0x04, 0x80, 0xe3, 0x11, 0xaf, 0x9d, 0x00, 0xc0, 0xed, 0xc4,
];

/// A six-byte Bluetooth device address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BdAddr(pub [u8; 6]);

impl std::fmt::Display for BdAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Abstract BLE central operations needed by the bridge manager
///
/// All methods are fire-and-forget: an `Ok` return means the request was
/// accepted by the stack, not that it completed. Outcomes are delivered as
/// [`TransportEvent`]s.
pub trait Transport: Send {
    /// Begin an active scan for the given window; ends with
    /// [`TransportEvent::ScanComplete`]
    fn start_scan(&mut self, window: Duration) -> Result<()>;

    /// Open a connection to a peripheral
    fn connect(&mut self, address: BdAddr) -> Result<()>;

    /// Enumerate the mesh characteristics on the open connection; ends with
    /// [`TransportEvent::CharacteristicsDiscovered`]
    fn discover_characteristics(&mut self) -> Result<()>;

    /// Enable notifications on a characteristic handle
    fn subscribe_notify(&mut self, handle: u16) -> Result<()>;

    /// Write a characteristic value
    fn write(&mut self, handle: u16, data: &[u8], with_response: bool) -> Result<()>;

    /// Tear down the open connection
    fn disconnect(&mut self) -> Result<()>;
}

/// Events delivered from the transport into the control loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An advertisement was seen during a scan
    ScanResult {
        /// Advertiser address
        address: BdAddr,
        /// Received signal strength in dBm
        rssi: i16,
        /// Raw advertisement + scan-response payload
        adv_data: Bytes,
    },
    /// The scan window elapsed
    ScanComplete,
    /// The scan could not be started or aborted
    ScanFailed,
    /// A connect request succeeded
    Connected,
    /// A connect request failed
    ConnectFailed,
    /// Characteristic enumeration finished; missing handles are `None`
    CharacteristicsDiscovered {
        /// Handle of the low characteristic, if found
        low: Option<u16>,
        /// Handle of the high characteristic, if found
        high: Option<u16>,
    },
    /// A subscribed characteristic delivered a value
    Notification {
        /// Value handle the notification arrived on
        handle: u16,
        /// Notification payload
        data: Bytes,
    },
    /// The link dropped, whatever the reason
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bd_addr_display() {
        let addr = BdAddr([0xAA, 0x1B, 0x00, 0x5C, 0xDE, 0x0F]);
        assert_eq!(addr.to_string(), "AA:1B:00:5C:DE:0F");
    }

    #[test]
    fn test_char_uuids_differ_by_one_byte() {
        let diff: Vec<usize> = (0..16).filter(|&i| CHAR_LOW_UUID[i] != CHAR_HIGH_UUID[i]).collect();
        assert_eq!(diff, vec![6]);
    }
}
