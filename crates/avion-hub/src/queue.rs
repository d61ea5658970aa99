//! Deferred action queue between request handlers and the control loop
//!
//! Request handlers (bus subscriptions, the local web UI) run on their own
//! threads and must never touch hub state directly. They append
//! [`PendingAction`]s here; the control loop swaps the whole queue out under
//! the lock once per tick and processes the local batch lock-free. The lock
//! is held only for the push or the swap, never for processing.

use std::sync::Arc;

use parking_lot::Mutex;

use avion_core::AvionId;

/// One deferred request, executed at most once by the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// Change brightness and/or color temperature on a device or group
    Control {
        /// Target id
        id: AvionId,
        /// New brightness, if the request carried one
        brightness: Option<u8>,
        /// New color temperature in kelvin, if the request carried one
        color_temp: Option<u16>,
    },
    /// Admit a device found by a discovery sweep into the catalog
    AddDiscovered {
        /// Device id
        id: AvionId,
        /// Display name
        name: String,
        /// Product type
        product_type: u8,
    },
    /// Remove a device from mesh and catalog
    Unclaim {
        /// Device id
        id: AvionId,
    },
    /// Create a group with an auto-assigned id
    CreateGroup {
        /// Display name
        name: String,
    },
    /// Delete a group
    DeleteGroup {
        /// Group id
        id: AvionId,
    },
    /// Add a device to a group
    AddToGroup {
        /// Device id
        id: AvionId,
        /// Group id
        group: AvionId,
    },
    /// Remove a device from a group
    RemoveFromGroup {
        /// Device id
        id: AvionId,
        /// Group id
        group: AvionId,
    },
    /// Bulk import of devices, groups, and optionally a passphrase
    Import {
        /// Raw JSON payload
        body: String,
    },
}

/// Cloneable multi-producer handle to the deferred action queue
#[derive(Clone, Default)]
pub struct ActionQueue {
    inner: Arc<Mutex<Vec<PendingAction>>>,
}

impl ActionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action; safe from any thread
    pub fn push(&self, action: PendingAction) {
        self.inner.lock().push(action);
    }

    /// Take every queued action, oldest first; the queue is left empty
    pub fn drain(&self) -> Vec<PendingAction> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Number of queued actions
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
