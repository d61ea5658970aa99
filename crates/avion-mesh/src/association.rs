//! Device-claim (association) handshake context
//!
//! The low-level key exchange is the codec's job; this module holds the one
//! in-flight claim, polls it each tick, and converts a stalled handshake
//! into a timeout exactly once (the context is consumed by any terminal
//! outcome).

use std::time::{Duration, Instant};

use avion_core::AvionId;

use crate::codec::{AssociationPoll, MeshCodec};

/// Hard ceiling on a claim handshake
pub const ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One in-flight claim handshake
#[derive(Debug, Clone)]
pub struct AssociationContext {
    /// Mesh address being assigned to the device
    pub device_id: AvionId,
    /// Hash of the device UUID being claimed
    pub uuid_hash: u32,
    /// When the handshake started
    pub started_at: Instant,
}

/// Terminal result of a claim handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationOutcome {
    /// Device accepted the network key
    Complete,
    /// Codec reported a handshake failure
    Failed(String),
    /// No terminal outcome within the deadline; handshake was cancelled
    TimedOut,
}

impl AssociationContext {
    /// Start tracking a handshake at `now`
    pub fn new(uuid_hash: u32, device_id: AvionId, now: Instant) -> Self {
        Self {
            device_id,
            uuid_hash,
            started_at: now,
        }
    }

    /// Poll the codec once; `Some` means the handshake is over and the
    /// context must be dropped. On timeout the codec is told to cancel.
    pub fn poll(
        &self,
        codec: &mut dyn MeshCodec,
        now: Instant,
        timeout: Duration,
    ) -> Option<AssociationOutcome> {
        match codec.associate_poll() {
            AssociationPoll::Complete => Some(AssociationOutcome::Complete),
            AssociationPoll::Failed(reason) => Some(AssociationOutcome::Failed(reason)),
            AssociationPoll::InProgress => {
                if now.duration_since(self.started_at) > timeout {
                    codec.associate_cancel();
                    Some(AssociationOutcome::TimedOut)
                } else {
                    None
                }
            }
        }
    }
}
