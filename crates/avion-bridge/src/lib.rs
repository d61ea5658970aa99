//! BLE bridge connection lifecycle for the AvionMesh hub
//!
//! The mesh is reachable only through a single bridge device over BLE. This
//! crate owns the link to that bridge:
//!
//! 1. **Scan** - collect advertisements, keep the strongest candidate that
//!    carries the mesh service UUID
//! 2. **Connect** - open a connection to the best candidate
//! 3. **Discover** - resolve the two mesh characteristics by UUID
//! 4. **Ready** - subscribe to notifications on both and pass traffic
//!
//! Any failure or link drop lands in `Disconnected` with a reconnect
//! scheduled a fixed delay later; the cycle repeats forever. There is no
//! retry ceiling - the bridge is expected to exist.
//!
//! The actual radio stack sits behind the [`Transport`] trait. Calls on it
//! are fire-and-forget; completions come back as [`TransportEvent`]s fed
//! into [`BridgeConnectionManager::handle_event`] by the control loop.

pub mod adv;
pub mod error;
pub mod manager;
pub mod transport;

pub use error::{BridgeError, Result};
pub use manager::{BridgeConnectionManager, LinkEvent, LinkState};
pub use transport::{
    BdAddr, Transport, TransportEvent, CHAR_HIGH_UUID, CHAR_LOW_UUID, MESH_SERVICE_UUID16,
};
