//! Mesh crypto/codec collaborator trait
//!
//! The CSRMesh-family cryptography (passphrase-derived network key, rolling
//! sequence numbers, MAC verification, packet fragmentation across the two
//! bridge characteristics) is a separate library consumed through the
//! [`MeshCodec`] trait. The session controller drives it and never touches
//! key material directly.

use bytes::Bytes;

use avion_core::{AvionId, Characteristic};

use crate::error::Result;

/// Source marker meaning "resolve the sender from the crypto layer"
///
/// Frames relayed by the bridge carry this value in the MCP source field;
/// the real originator is then the crypto-layer source. A zero MCP source
/// marks the hub's own broadcast coming back around.
pub const MCP_SOURCE_CRYPTO: u16 = 0x8000;

/// One encrypted fragment ready for a characteristic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshWrite {
    /// Which characteristic to write
    pub characteristic: Characteristic,
    /// Encrypted fragment bytes
    pub data: Vec<u8>,
    /// Whether the write wants a link-layer response
    pub with_response: bool,
}

/// A decrypted, reassembled inbound frame
#[derive(Debug, Clone)]
pub struct MeshFrame {
    /// Source id from the mesh control protocol header
    pub mcp_source: u16,
    /// Source id recovered by the crypto layer
    pub crypto_source: u16,
    /// Model opcode
    pub opcode: u8,
    /// Decrypted payload
    pub payload: Bytes,
}

impl MeshFrame {
    /// The effective originator of this frame
    pub fn source_id(&self) -> AvionId {
        if self.mcp_source == MCP_SOURCE_CRYPTO {
            self.crypto_source
        } else {
            self.mcp_source
        }
    }

    /// Whether this frame is an echo of the hub's own broadcast
    pub fn is_own_echo(&self) -> bool {
        self.mcp_source == 0
    }
}

/// Progress report from the association sub-protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationPoll {
    /// Handshake still exchanging steps
    InProgress,
    /// Device accepted the network key
    Complete,
    /// Handshake failed with the given reason
    Failed(String),
}

/// Crypto and packet-codec operations the session controller depends on
pub trait MeshCodec: Send {
    /// Derive the session from a passphrase; replaces any prior session
    fn init(&mut self, passphrase: &str) -> Result<()>;

    /// Drop the session entirely (factory reset)
    fn reset(&mut self);

    /// Whether a session is currently derived
    fn is_initialized(&self) -> bool;

    /// Encrypt and fragment one command for the wire
    fn encode(&mut self, dest: AvionId, opcode: u8, payload: &[u8]) -> Result<Vec<MeshWrite>>;

    /// Feed one notification fragment; returns a frame once a full packet
    /// reassembles and verifies, `None` while fragments are pending
    fn decode(&mut self, characteristic: Characteristic, data: &[u8]) -> Result<Option<MeshFrame>>;

    /// Begin the claim handshake with an unassociated device
    fn associate_start(&mut self, uuid_hash: u32, device_id: AvionId) -> Result<()>;

    /// Advance/inspect the claim handshake
    fn associate_poll(&mut self) -> AssociationPoll;

    /// Abandon the claim handshake and release its state
    fn associate_cancel(&mut self);

    /// Tell a claimed device to leave the network
    fn disassociate(&mut self, device_id: AvionId) -> Result<()>;

    /// Enable or disable collection of unassociated-device announcements
    fn listen_unassociated(&mut self, enabled: bool);

    /// Drain device UUID hashes heard since the last call
    fn take_unassociated(&mut self) -> Vec<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_resolution() {
        let relayed = MeshFrame {
            mcp_source: MCP_SOURCE_CRYPTO,
            crypto_source: 33000,
            opcode: 0x73,
            payload: Bytes::new(),
        };
        assert_eq!(relayed.source_id(), 33000);

        let direct = MeshFrame {
            mcp_source: 33001,
            crypto_source: 0,
            opcode: 0x73,
            payload: Bytes::new(),
        };
        assert_eq!(direct.source_id(), 33001);
    }

    #[test]
    fn test_own_echo_detection() {
        let echo = MeshFrame {
            mcp_source: 0,
            crypto_source: 0,
            opcode: 0x73,
            payload: Bytes::new(),
        };
        assert!(echo.is_own_echo());
    }
}
