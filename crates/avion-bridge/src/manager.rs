//! Bridge link lifecycle state machine
//!
//! One instance owns the link to the single mesh bridge. State only moves on
//! the control loop: transport events go through [`handle_event`], deadlines
//! through [`tick`].
//!
//! [`handle_event`]: BridgeConnectionManager::handle_event
//! [`tick`]: BridgeConnectionManager::tick

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use avion_core::Characteristic;

use crate::adv;
use crate::error::{BridgeError, Result};
use crate::transport::{BdAddr, Transport, TransportEvent, MESH_SERVICE_UUID16};

/// Default scan window before picking a candidate
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Default spacing between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Sentinel meaning no candidate has been seen this sweep
const RSSI_NONE: i16 = -999;

/// Link lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not started
    Idle,
    /// Collecting advertisements
    Scanning,
    /// Connection attempt in flight
    Connecting,
    /// Connected, enumerating characteristics
    Discovering,
    /// Subscribed and passing traffic
    Ready,
    /// Down, reconnect scheduled
    Disconnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Scanning => write!(f, "scanning"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Discovering => write!(f, "discovering"),
            LinkState::Ready => write!(f, "ready"),
            LinkState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// What the orchestrator needs to know about link activity
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Both characteristics subscribed; traffic may flow
    Ready,
    /// The link was up and dropped
    Lost,
    /// Inbound mesh bytes from a subscribed characteristic
    Notification {
        /// Which half the bytes arrived on
        characteristic: Characteristic,
        /// Notification payload
        data: Bytes,
    },
}

/// Owns the BLE link to the mesh bridge
pub struct BridgeConnectionManager {
    transport: Box<dyn Transport>,
    state: LinkState,
    address: BdAddr,
    best_rssi: i16,
    char_low: Option<u16>,
    char_high: Option<u16>,
    reconnect_at: Option<Instant>,
    scan_window: Duration,
    reconnect_delay: Duration,
}

impl BridgeConnectionManager {
    /// Create a manager with default timing
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_timing(transport, DEFAULT_SCAN_WINDOW, DEFAULT_RECONNECT_DELAY)
    }

    /// Create a manager with explicit scan window and reconnect spacing
    pub fn with_timing(
        transport: Box<dyn Transport>,
        scan_window: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            transport,
            state: LinkState::Idle,
            address: BdAddr::default(),
            best_rssi: RSSI_NONE,
            char_low: None,
            char_high: None,
            reconnect_at: None,
            scan_window,
            reconnect_delay,
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether traffic may flow
    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready && self.char_low.is_some() && self.char_high.is_some()
    }

    /// Address of the bridge currently targeted (valid once a candidate won)
    pub fn bridge_address(&self) -> BdAddr {
        self.address
    }

    /// Begin (or restart) the scan phase
    pub fn start_scan(&mut self, now: Instant) {
        self.state = LinkState::Scanning;
        self.best_rssi = RSSI_NONE;
        self.address = BdAddr::default();
        self.reconnect_at = None;
        info!("Scanning for mesh bridges...");

        if let Err(e) = self.transport.start_scan(self.scan_window) {
            warn!("Scan start failed: {e}");
            self.schedule_reconnect(now);
        }
    }

    /// Feed one transport event through the state machine
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Option<LinkEvent> {
        match event {
            TransportEvent::ScanResult {
                address,
                rssi,
                adv_data,
            } => {
                self.on_scan_result(address, rssi, &adv_data);
                None
            }

            TransportEvent::ScanComplete => {
                if self.state == LinkState::Scanning {
                    debug!("Scan complete");
                    self.connect_to_best(now);
                }
                None
            }

            TransportEvent::ScanFailed => {
                warn!("Scan failed, will retry");
                self.schedule_reconnect(now);
                None
            }

            TransportEvent::Connected => {
                self.state = LinkState::Discovering;
                info!("Connected to {}, discovering characteristics...", self.address);
                if let Err(e) = self.transport.discover_characteristics() {
                    warn!("Characteristic discovery failed to start: {e}");
                    let _ = self.transport.disconnect();
                    self.schedule_reconnect(now);
                }
                None
            }

            TransportEvent::ConnectFailed => {
                warn!("Connection to {} failed, will retry", self.address);
                self.on_disconnected(now)
            }

            TransportEvent::CharacteristicsDiscovered { low, high } => {
                self.on_characteristics(low, high, now)
            }

            TransportEvent::Notification { handle, data } => self.on_notification(handle, data),

            TransportEvent::Disconnected => {
                warn!("Bridge link dropped");
                self.on_disconnected(now)
            }
        }
    }

    /// Poll deadlines; call once per control-loop tick
    pub fn tick(&mut self, now: Instant) {
        if self.state == LinkState::Disconnected {
            if let Some(at) = self.reconnect_at {
                if now >= at {
                    self.start_scan(now);
                }
            }
        }
    }

    /// Pull the next reconnect attempt forward to the next tick
    pub fn reconnect_now(&mut self, now: Instant) {
        if matches!(self.state, LinkState::Disconnected | LinkState::Idle) {
            self.state = LinkState::Disconnected;
            self.reconnect_at = Some(now);
            info!("Reconnect requested");
        }
    }

    /// Write mesh bytes to one of the subscribed characteristics
    pub fn write(&mut self, ch: Characteristic, data: &[u8], with_response: bool) -> Result<()> {
        if self.state != LinkState::Ready {
            return Err(BridgeError::NotReady);
        }
        let handle = match ch {
            Characteristic::Low => self.char_low,
            Characteristic::High => self.char_high,
        }
        .ok_or(BridgeError::NotReady)?;

        self.transport.write(handle, data, with_response)
    }

    fn on_scan_result(&mut self, address: BdAddr, rssi: i16, adv_data: &[u8]) {
        if self.state != LinkState::Scanning {
            return;
        }
        if !adv::has_service_uuid16(adv_data, MESH_SERVICE_UUID16) {
            return;
        }

        debug!("Mesh bridge candidate: {address} RSSI={rssi}");
        if rssi > self.best_rssi {
            self.best_rssi = rssi;
            self.address = address;
        }
    }

    fn connect_to_best(&mut self, now: Instant) {
        if self.best_rssi == RSSI_NONE {
            warn!(
                "No mesh bridges found, retrying in {:?}",
                self.reconnect_delay
            );
            self.schedule_reconnect(now);
            return;
        }

        info!(
            "Connecting to best bridge: {} (RSSI={})",
            self.address, self.best_rssi
        );
        self.state = LinkState::Connecting;
        if let Err(e) = self.transport.connect(self.address) {
            warn!("Connect request failed: {e}");
            self.schedule_reconnect(now);
        }
    }

    fn on_characteristics(
        &mut self,
        low: Option<u16>,
        high: Option<u16>,
        now: Instant,
    ) -> Option<LinkEvent> {
        match (low, high) {
            (Some(low), Some(high)) => {
                info!("Found characteristics: LOW=0x{low:04X} HIGH=0x{high:04X}");
                self.char_low = Some(low);
                self.char_high = Some(high);

                if let Err(e) = self
                    .transport
                    .subscribe_notify(low)
                    .and_then(|()| self.transport.subscribe_notify(high))
                {
                    warn!("Notification subscribe failed: {e}");
                    let _ = self.transport.disconnect();
                    return self.on_disconnected(now);
                }

                self.state = LinkState::Ready;
                info!("Bridge link ready");
                Some(LinkEvent::Ready)
            }
            _ => {
                warn!(
                    "Mesh characteristics not found (low={:?} high={:?})",
                    low, high
                );
                let _ = self.transport.disconnect();
                self.on_disconnected(now)
            }
        }
    }

    fn on_notification(&mut self, handle: u16, data: Bytes) -> Option<LinkEvent> {
        if self.state != LinkState::Ready {
            return None;
        }
        let characteristic = if Some(handle) == self.char_low {
            Characteristic::Low
        } else if Some(handle) == self.char_high {
            Characteristic::High
        } else {
            return None;
        };
        Some(LinkEvent::Notification {
            characteristic,
            data,
        })
    }

    fn on_disconnected(&mut self, now: Instant) -> Option<LinkEvent> {
        let was_ready = self.state == LinkState::Ready;
        self.char_low = None;
        self.char_high = None;
        self.schedule_reconnect(now);
        was_ready.then_some(LinkEvent::Lost)
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        self.state = LinkState::Disconnected;
        self.reconnect_at = Some(now + self.reconnect_delay);
        info!("Will reconnect in {:?}", self.reconnect_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records transport calls; everything succeeds unless told otherwise
    #[derive(Default)]
    struct MockTransport {
        calls: Arc<Mutex<Vec<String>>>,
        fail_scan: bool,
    }

    impl MockTransport {
        fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: calls.clone(),
                    fail_scan: false,
                },
                calls,
            )
        }
    }

    impl Transport for MockTransport {
        fn start_scan(&mut self, _window: Duration) -> Result<()> {
            self.calls.lock().unwrap().push("scan".into());
            if self.fail_scan {
                return Err(BridgeError::ScanFailed("params".into()));
            }
            Ok(())
        }

        fn connect(&mut self, address: BdAddr) -> Result<()> {
            self.calls.lock().unwrap().push(format!("connect {address}"));
            Ok(())
        }

        fn discover_characteristics(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("discover".into());
            Ok(())
        }

        fn subscribe_notify(&mut self, handle: u16) -> Result<()> {
            self.calls.lock().unwrap().push(format!("notify 0x{handle:04X}"));
            Ok(())
        }

        fn write(&mut self, handle: u16, data: &[u8], _with_response: bool) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("write 0x{handle:04X} {}B", data.len()));
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("disconnect".into());
            Ok(())
        }
    }

    fn mesh_adv() -> Bytes {
        // Complete 16-bit service UUID list containing 0xFEF1
        Bytes::from_static(&[0x03, 0x03, 0xF1, 0xFE])
    }

    fn scan_result(addr: u8, rssi: i16) -> TransportEvent {
        TransportEvent::ScanResult {
            address: BdAddr([addr, 0, 0, 0, 0, 0]),
            rssi,
            adv_data: mesh_adv(),
        }
    }

    fn ready_manager(now: Instant) -> (BridgeConnectionManager, Arc<Mutex<Vec<String>>>) {
        let (transport, calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));
        mgr.start_scan(now);
        mgr.handle_event(scan_result(1, -40), now);
        mgr.handle_event(TransportEvent::ScanComplete, now);
        mgr.handle_event(TransportEvent::Connected, now);
        let ev = mgr.handle_event(
            TransportEvent::CharacteristicsDiscovered {
                low: Some(0x10),
                high: Some(0x12),
            },
            now,
        );
        assert!(matches!(ev, Some(LinkEvent::Ready)));
        (mgr, calls)
    }

    #[test]
    fn test_strongest_candidate_wins() {
        let now = Instant::now();
        let (transport, calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        mgr.handle_event(scan_result(1, -70), now);
        mgr.handle_event(scan_result(2, -45), now);
        mgr.handle_event(scan_result(3, -60), now);
        mgr.handle_event(TransportEvent::ScanComplete, now);

        assert_eq!(mgr.state(), LinkState::Connecting);
        assert_eq!(mgr.bridge_address(), BdAddr([2, 0, 0, 0, 0, 0]));
        assert!(calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.starts_with("connect 02:")));
    }

    #[test]
    fn test_rssi_tie_keeps_first_seen() {
        let now = Instant::now();
        let (transport, _calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        mgr.handle_event(scan_result(1, -50), now);
        mgr.handle_event(scan_result(2, -50), now);
        mgr.handle_event(TransportEvent::ScanComplete, now);

        assert_eq!(mgr.bridge_address(), BdAddr([1, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_non_mesh_adv_ignored() {
        let now = Instant::now();
        let (transport, _calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        mgr.handle_event(
            TransportEvent::ScanResult {
                address: BdAddr([9, 0, 0, 0, 0, 0]),
                rssi: -10,
                adv_data: Bytes::from_static(&[0x02, 0x01, 0x06]),
            },
            now,
        );
        mgr.handle_event(TransportEvent::ScanComplete, now);

        // No candidate: straight to Disconnected with a reconnect pending
        assert_eq!(mgr.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_empty_scan_schedules_reconnect() {
        let now = Instant::now();
        let (transport, calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        mgr.handle_event(TransportEvent::ScanComplete, now);
        assert_eq!(mgr.state(), LinkState::Disconnected);

        // Not yet due
        mgr.tick(now + Duration::from_secs(1));
        assert_eq!(mgr.state(), LinkState::Disconnected);

        // 3 s later the scan restarts
        mgr.tick(now + DEFAULT_RECONNECT_DELAY);
        assert_eq!(mgr.state(), LinkState::Scanning);
        assert_eq!(
            calls.lock().unwrap().iter().filter(|c| *c == "scan").count(),
            2
        );
    }

    #[test]
    fn test_full_happy_path_to_ready() {
        let now = Instant::now();
        let (mgr, calls) = ready_manager(now);

        assert_eq!(mgr.state(), LinkState::Ready);
        assert!(mgr.is_ready());
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"notify 0x0010".to_string()));
        assert!(calls.contains(&"notify 0x0012".to_string()));
    }

    #[test]
    fn test_missing_characteristic_disconnects() {
        let now = Instant::now();
        let (transport, calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        mgr.handle_event(scan_result(1, -40), now);
        mgr.handle_event(TransportEvent::ScanComplete, now);
        mgr.handle_event(TransportEvent::Connected, now);
        let ev = mgr.handle_event(
            TransportEvent::CharacteristicsDiscovered {
                low: Some(0x10),
                high: None,
            },
            now,
        );

        assert!(ev.is_none());
        assert_eq!(mgr.state(), LinkState::Disconnected);
        assert!(calls.lock().unwrap().contains(&"disconnect".to_string()));
    }

    #[test]
    fn test_disconnect_clears_handles_and_reports_lost() {
        let now = Instant::now();
        let (mut mgr, _calls) = ready_manager(now);

        let ev = mgr.handle_event(TransportEvent::Disconnected, now);
        assert!(matches!(ev, Some(LinkEvent::Lost)));
        assert_eq!(mgr.state(), LinkState::Disconnected);
        assert!(!mgr.is_ready());
        assert!(matches!(
            mgr.write(Characteristic::Low, &[1], false),
            Err(BridgeError::NotReady)
        ));
    }

    #[test]
    fn test_connect_failed_no_lost_event() {
        let now = Instant::now();
        let (transport, _calls) = MockTransport::new();
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        mgr.handle_event(scan_result(1, -40), now);
        mgr.handle_event(TransportEvent::ScanComplete, now);
        let ev = mgr.handle_event(TransportEvent::ConnectFailed, now);

        // Was never Ready, so nothing to report beyond the state change
        assert!(ev.is_none());
        assert_eq!(mgr.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_notifications_mapped_by_handle() {
        let now = Instant::now();
        let (mut mgr, _calls) = ready_manager(now);

        let ev = mgr.handle_event(
            TransportEvent::Notification {
                handle: 0x12,
                data: Bytes::from_static(&[0xAB]),
            },
            now,
        );
        match ev {
            Some(LinkEvent::Notification {
                characteristic,
                data,
            }) => {
                assert_eq!(characteristic, Characteristic::High);
                assert_eq!(&data[..], &[0xAB]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Unknown handle is dropped
        let ev = mgr.handle_event(
            TransportEvent::Notification {
                handle: 0x99,
                data: Bytes::new(),
            },
            now,
        );
        assert!(ev.is_none());
    }

    #[test]
    fn test_write_targets_correct_handle() {
        let now = Instant::now();
        let (mut mgr, calls) = ready_manager(now);

        mgr.write(Characteristic::Low, &[1, 2, 3], true).unwrap();
        mgr.write(Characteristic::High, &[4], false).unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"write 0x0010 3B".to_string()));
        assert!(calls.contains(&"write 0x0012 1B".to_string()));
    }

    #[test]
    fn test_scan_request_failure_converges_on_reconnect() {
        let now = Instant::now();
        let (mut transport, _calls) = MockTransport::new();
        transport.fail_scan = true;
        let mut mgr = BridgeConnectionManager::new(Box::new(transport));

        mgr.start_scan(now);
        assert_eq!(mgr.state(), LinkState::Disconnected);
    }
}
