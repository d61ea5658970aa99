//! Mesh session controller for the AvionMesh hub
//!
//! This crate owns everything between raw bridge notifications and typed
//! mesh traffic:
//!
//! - **Session** - readiness tracking (crypto initialized AND bridge link
//!   up), command gating, inbound frame demultiplexing
//! - **Commands** - typed light/mesh commands and their wire encoding
//! - **Association** - the multi-step device-claim handshake, polled once
//!   per control-loop tick with a hard timeout
//! - **Queries** - broadcast discovery sweeps, unassociated-device scans,
//!   and targeted examine queries, all single-flight with fixed windows
//!
//! The mesh cryptography and packet framing live behind the [`MeshCodec`]
//! trait; this crate never sees key material, only the rolling session the
//! codec maintains.

pub mod association;
pub mod codec;
pub mod command;
pub mod error;
pub mod session;

pub use association::{AssociationContext, AssociationOutcome};
pub use codec::{AssociationPoll, MeshCodec, MeshFrame, MeshWrite, MCP_SOURCE_CRYPTO};
pub use command::{parse_ping_payload, parse_status, Command, Status, Verb, MODEL_OPCODE};
pub use error::{MeshError, Result};
pub use session::{MeshSessionController, SessionEvent};
