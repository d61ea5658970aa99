//! Mesh session controller
//!
//! Owns the crypto session (through the codec), gates all command traffic on
//! readiness, and demultiplexes inbound frames between the three concurrent
//! consumers: an active discovery sweep, an active examine query, and plain
//! status reports.
//!
//! Readiness is the AND of "crypto session derived" and "bridge link ready".
//! Either edge produces a [`SessionEvent::ReadinessChanged`] so dependents
//! can stop or resume issuing commands.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use avion_core::{AvionId, Characteristic, DiscoveredDevice};

use crate::association::{AssociationContext, AssociationOutcome, ASSOCIATION_TIMEOUT};
use crate::codec::{MeshCodec, MeshWrite};
use crate::command::{
    parse_ping_payload, parse_status, Command, Status, Verb, MODEL_OPCODE, PING_RESPONSE_MIN_LEN,
};
use crate::error::{MeshError, Result};

/// Window for a broadcast discovery sweep
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Window for an unassociated-device scan
pub const UNASSOCIATED_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Deadline for a targeted examine query
pub const EXAMINE_TIMEOUT: Duration = Duration::from_secs(5);

/// Things the orchestrator reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Readiness flipped; `true` means traffic may flow
    ReadinessChanged(bool),
    /// A device reported brightness and/or color temperature
    StatusUpdate(Status),
    /// The discovery sweep window closed
    DiscoveryFinished {
        /// Unique responders collected during the window
        devices: Vec<DiscoveredDevice>,
    },
    /// An unassociated device announced itself during a scan
    UnassociatedSeen {
        /// Hash of the device UUID
        uuid_hash: u32,
    },
    /// The unassociated-scan window closed
    UnassociatedScanFinished {
        /// All hashes heard during the window
        uuid_hashes: Vec<u32>,
    },
    /// The examine target answered
    ExamineResult {
        /// Parsed device info
        device: DiscoveredDevice,
    },
    /// The examine target never answered
    ExamineTimeout {
        /// The id that was queried
        target: AvionId,
    },
    /// A claim handshake concluded successfully
    AssociationComplete {
        /// The newly claimed device
        device_id: AvionId,
    },
    /// A claim handshake failed, timed out, or was refused
    AssociationFailed {
        /// The device that was being claimed
        device_id: AvionId,
        /// Failure description ("timeout" for deadline expiry)
        reason: String,
    },
}

struct Sweep {
    deadline: Instant,
    devices: Vec<DiscoveredDevice>,
}

struct UnassociatedScan {
    deadline: Instant,
    uuid_hashes: Vec<u32>,
}

struct Examine {
    target: AvionId,
    deadline: Instant,
}

/// Drives the mesh crypto session and inbound/outbound traffic
pub struct MeshSessionController {
    codec: Box<dyn MeshCodec>,
    crypto_ready: bool,
    link_ready: bool,
    rx_count: u64,
    sweep: Option<Sweep>,
    unassoc: Option<UnassociatedScan>,
    examine: Option<Examine>,
    association: Option<AssociationContext>,
    discovery_window: Duration,
    unassoc_window: Duration,
    examine_timeout: Duration,
    association_timeout: Duration,
}

impl MeshSessionController {
    /// Create a controller with default protocol timing
    pub fn new(codec: Box<dyn MeshCodec>) -> Self {
        Self {
            codec,
            crypto_ready: false,
            link_ready: false,
            rx_count: 0,
            sweep: None,
            unassoc: None,
            examine: None,
            association: None,
            discovery_window: DISCOVERY_WINDOW,
            unassoc_window: UNASSOCIATED_SCAN_WINDOW,
            examine_timeout: EXAMINE_TIMEOUT,
            association_timeout: ASSOCIATION_TIMEOUT,
        }
    }

    /// Override protocol timing (tests, mostly)
    pub fn with_timing(
        mut self,
        discovery_window: Duration,
        examine_timeout: Duration,
        association_timeout: Duration,
    ) -> Self {
        self.discovery_window = discovery_window;
        self.unassoc_window = discovery_window;
        self.examine_timeout = examine_timeout;
        self.association_timeout = association_timeout;
        self
    }

    /// Whether command traffic is currently allowed
    pub fn is_ready(&self) -> bool {
        self.crypto_ready && self.link_ready
    }

    /// Whether the crypto session is derived
    pub fn crypto_ready(&self) -> bool {
        self.crypto_ready
    }

    /// Frames decoded so far (diagnostic)
    pub fn rx_count(&self) -> u64 {
        self.rx_count
    }

    /// Whether a claim handshake is in flight
    pub fn is_associating(&self) -> bool {
        self.association.is_some()
    }

    /// Whether a discovery sweep is in flight
    pub fn is_discovering(&self) -> bool {
        self.sweep.is_some()
    }

    /// Derive the crypto session from a passphrase
    pub fn init_crypto(&mut self, passphrase: &str) -> Result<Vec<SessionEvent>> {
        if passphrase.is_empty() {
            return Err(MeshError::EmptyPassphrase);
        }
        let was_ready = self.is_ready();
        self.codec.init(passphrase)?;
        self.crypto_ready = true;
        info!("Mesh crypto session initialized");

        let mut events = Vec::new();
        self.emit_readiness_edge(was_ready, &mut events);
        Ok(events)
    }

    /// Drop the crypto session (factory reset / passphrase change)
    pub fn reset_crypto(&mut self) -> Vec<SessionEvent> {
        let was_ready = self.is_ready();
        self.codec.reset();
        self.crypto_ready = false;

        let mut events = Vec::new();
        self.emit_readiness_edge(was_ready, &mut events);
        events
    }

    /// Tell the session whether the bridge link is up
    pub fn set_link_ready(&mut self, ready: bool, _now: Instant) -> Vec<SessionEvent> {
        let was_ready = self.is_ready();
        self.link_ready = ready;

        if !ready {
            // A dropped link orphans an in-flight claim; clean it up without
            // a failure event - the readiness downgrade is the signal
            if self.association.take().is_some() {
                self.codec.associate_cancel();
                debug!("Association cancelled by link loss");
            }
        }

        let mut events = Vec::new();
        self.emit_readiness_edge(was_ready, &mut events);
        events
    }

    /// Encode one command for the wire
    pub fn send(&mut self, cmd: Command) -> Result<Vec<MeshWrite>> {
        if !self.is_ready() {
            return Err(MeshError::NotReady);
        }
        self.codec.encode(cmd.dest(), MODEL_OPCODE, &cmd.payload())
    }

    /// Feed one raw notification; returns events from any frame it completed
    pub fn handle_notification(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        _now: Instant,
    ) -> Result<Vec<SessionEvent>> {
        let Some(frame) = self.codec.decode(characteristic, data)? else {
            return Ok(Vec::new());
        };

        self.rx_count += 1;
        let source = frame.source_id();
        debug!(
            "RX #{}: src={} opcode=0x{:02X} len={}",
            self.rx_count,
            source,
            frame.opcode,
            frame.payload.len()
        );

        let mut events = Vec::new();

        if (self.sweep.is_some() || self.examine.is_some())
            && frame.opcode == MODEL_OPCODE
            && frame.payload.len() >= PING_RESPONSE_MIN_LEN
            && frame.payload[0] == Verb::Ping as u8
        {
            // Our own broadcast ping comes back around; nothing below wants it
            if self.sweep.is_some() && frame.is_own_echo() {
                return Ok(events);
            }

            if self.examine.as_ref().is_some_and(|e| e.target == source) {
                self.examine = None;
                if let Some(device) = parse_ping_payload(source, &frame.payload) {
                    events.push(SessionEvent::ExamineResult { device });
                }
            }

            if let Some(sweep) = &mut self.sweep {
                if !sweep.devices.iter().any(|d| d.device_id == source) {
                    if let Some(device) = parse_ping_payload(source, &frame.payload) {
                        info!(
                            "Discovered device {}: fw={} product={}",
                            source,
                            device.fw_version(),
                            device.product_id
                        );
                        sweep.devices.push(device);
                    }
                }
            }
        }

        if let Some(status) = parse_status(&frame) {
            events.push(SessionEvent::StatusUpdate(status));
        }

        Ok(events)
    }

    /// Begin a broadcast discovery sweep; returns the ping writes
    pub fn start_discovery(&mut self, now: Instant) -> Result<Vec<MeshWrite>> {
        if self.sweep.is_some() {
            return Err(MeshError::Busy("discovery sweep"));
        }
        if !self.is_ready() {
            return Err(MeshError::NotReady);
        }

        info!("Starting mesh discovery (broadcast ping)...");
        self.sweep = Some(Sweep {
            deadline: now + self.discovery_window,
            devices: Vec::new(),
        });
        self.send(Command::Ping { target: 0 })
    }

    /// Begin an unassociated-device scan
    pub fn start_unassociated_scan(&mut self, now: Instant) -> Result<()> {
        if self.unassoc.is_some() {
            return Err(MeshError::Busy("unassociated scan"));
        }
        if !self.is_ready() {
            return Err(MeshError::NotReady);
        }

        info!("Starting unassociated device scan...");
        self.codec.listen_unassociated(true);
        self.unassoc = Some(UnassociatedScan {
            deadline: now + self.unassoc_window,
            uuid_hashes: Vec::new(),
        });
        Ok(())
    }

    /// Begin a targeted examine query; returns the ping writes
    pub fn start_examine(&mut self, target: AvionId, now: Instant) -> Result<Vec<MeshWrite>> {
        if self.examine.is_some() {
            return Err(MeshError::Busy("examine query"));
        }
        if !self.is_ready() {
            return Err(MeshError::NotReady);
        }

        info!("Examining device {target}");
        self.examine = Some(Examine {
            target,
            deadline: now + self.examine_timeout,
        });
        self.send(Command::Ping { target })
    }

    /// Begin a claim handshake
    pub fn start_association(
        &mut self,
        uuid_hash: u32,
        device_id: AvionId,
        now: Instant,
    ) -> Result<()> {
        if self.association.is_some() {
            return Err(MeshError::Busy("association"));
        }
        if !self.is_ready() {
            return Err(MeshError::NotReady);
        }

        info!("Claiming device: uuid_hash=0x{uuid_hash:08x}, device_id={device_id}");
        self.codec.associate_start(uuid_hash, device_id)?;
        self.association = Some(AssociationContext::new(uuid_hash, device_id, now));
        Ok(())
    }

    /// Abandon any in-flight claim handshake without emitting an outcome
    pub fn cancel_association(&mut self) {
        if self.association.take().is_some() {
            self.codec.associate_cancel();
        }
    }

    /// Tell a claimed device to leave the mesh
    pub fn disassociate(&mut self, device_id: AvionId) -> Result<()> {
        self.codec.disassociate(device_id)
    }

    /// Poll all deadlines and the claim handshake; call once per tick
    pub fn tick(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        // Unassociated announcements drain incrementally so listeners see
        // them as they arrive, not only at window close
        if let Some(mut scan) = self.unassoc.take() {
            for uuid_hash in self.codec.take_unassociated() {
                if !scan.uuid_hashes.contains(&uuid_hash) {
                    scan.uuid_hashes.push(uuid_hash);
                    events.push(SessionEvent::UnassociatedSeen { uuid_hash });
                }
            }
            if now >= scan.deadline {
                self.codec.listen_unassociated(false);
                events.push(SessionEvent::UnassociatedScanFinished {
                    uuid_hashes: scan.uuid_hashes,
                });
            } else {
                self.unassoc = Some(scan);
            }
        }

        if let Some(sweep) = self.sweep.take() {
            if now >= sweep.deadline {
                info!(
                    "Mesh discovery complete: {} device(s) found",
                    sweep.devices.len()
                );
                events.push(SessionEvent::DiscoveryFinished {
                    devices: sweep.devices,
                });
            } else {
                self.sweep = Some(sweep);
            }
        }

        if let Some(examine) = self.examine.take() {
            if now >= examine.deadline {
                warn!("Examine of device {} timed out", examine.target);
                events.push(SessionEvent::ExamineTimeout {
                    target: examine.target,
                });
            } else {
                self.examine = Some(examine);
            }
        }

        if let Some(ctx) = self.association.take() {
            match ctx.poll(self.codec.as_mut(), now, self.association_timeout) {
                None => self.association = Some(ctx),
                Some(AssociationOutcome::Complete) => {
                    info!("Association complete for device {}", ctx.device_id);
                    events.push(SessionEvent::AssociationComplete {
                        device_id: ctx.device_id,
                    });
                }
                Some(AssociationOutcome::Failed(reason)) => {
                    warn!("Association failed: {reason}");
                    events.push(SessionEvent::AssociationFailed {
                        device_id: ctx.device_id,
                        reason,
                    });
                }
                Some(AssociationOutcome::TimedOut) => {
                    warn!("Association timed out for device {}", ctx.device_id);
                    events.push(SessionEvent::AssociationFailed {
                        device_id: ctx.device_id,
                        reason: "timeout".into(),
                    });
                }
            }
        }

        events
    }

    fn emit_readiness_edge(&self, was_ready: bool, events: &mut Vec<SessionEvent>) {
        let now_ready = self.is_ready();
        if now_ready != was_ready {
            if now_ready {
                info!("Mesh is now fully operational");
            } else {
                info!(
                    "Mesh is no longer operational (crypto={}, link={})",
                    self.crypto_ready, self.link_ready
                );
            }
            events.push(SessionEvent::ReadinessChanged(now_ready));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::{AssociationPoll, MeshFrame, MCP_SOURCE_CRYPTO};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Shared scriptable state behind [`MockCodec`]
    pub struct CodecState {
        pub initialized: bool,
        pub encoded: Vec<(AvionId, u8, Vec<u8>)>,
        pub frames: VecDeque<MeshFrame>,
        pub assoc_result: AssociationPoll,
        pub assoc_started: Option<(u32, AvionId)>,
        pub cancelled: bool,
        pub disassociated: Vec<AvionId>,
        pub listening: bool,
        pub unassoc_queue: Vec<u32>,
    }

    impl Default for CodecState {
        fn default() -> Self {
            Self {
                initialized: false,
                encoded: Vec::new(),
                frames: VecDeque::new(),
                assoc_result: AssociationPoll::InProgress,
                assoc_started: None,
                cancelled: false,
                disassociated: Vec::new(),
                listening: false,
                unassoc_queue: Vec::new(),
            }
        }
    }

    /// Scriptable codec: decode pops pre-queued frames, encode records calls
    pub struct MockCodec {
        pub state: Arc<Mutex<CodecState>>,
    }

    impl MockCodec {
        pub fn new() -> (Self, Arc<Mutex<CodecState>>) {
            let state = Arc::new(Mutex::new(CodecState::default()));
            (
                Self {
                    state: state.clone(),
                },
                state,
            )
        }
    }

    impl MeshCodec for MockCodec {
        fn init(&mut self, _passphrase: &str) -> Result<()> {
            self.state.lock().unwrap().initialized = true;
            Ok(())
        }

        fn reset(&mut self) {
            self.state.lock().unwrap().initialized = false;
        }

        fn is_initialized(&self) -> bool {
            self.state.lock().unwrap().initialized
        }

        fn encode(&mut self, dest: AvionId, opcode: u8, payload: &[u8]) -> Result<Vec<MeshWrite>> {
            self.state
                .lock()
                .unwrap()
                .encoded
                .push((dest, opcode, payload.to_vec()));
            Ok(vec![MeshWrite {
                characteristic: Characteristic::Low,
                data: payload.to_vec(),
                with_response: false,
            }])
        }

        fn decode(
            &mut self,
            _characteristic: Characteristic,
            _data: &[u8],
        ) -> Result<Option<MeshFrame>> {
            Ok(self.state.lock().unwrap().frames.pop_front())
        }

        fn associate_start(&mut self, uuid_hash: u32, device_id: AvionId) -> Result<()> {
            self.state.lock().unwrap().assoc_started = Some((uuid_hash, device_id));
            Ok(())
        }

        fn associate_poll(&mut self) -> AssociationPoll {
            self.state.lock().unwrap().assoc_result.clone()
        }

        fn associate_cancel(&mut self) {
            self.state.lock().unwrap().cancelled = true;
        }

        fn disassociate(&mut self, device_id: AvionId) -> Result<()> {
            self.state.lock().unwrap().disassociated.push(device_id);
            Ok(())
        }

        fn listen_unassociated(&mut self, enabled: bool) {
            self.state.lock().unwrap().listening = enabled;
        }

        fn take_unassociated(&mut self) -> Vec<u32> {
            std::mem::take(&mut self.state.lock().unwrap().unassoc_queue)
        }
    }

    fn ready_session() -> (MeshSessionController, Arc<Mutex<CodecState>>) {
        let (codec, state) = MockCodec::new();
        let mut session = MeshSessionController::new(Box::new(codec));
        session.init_crypto("test-passphrase").unwrap();
        session.set_link_ready(true, Instant::now());
        (session, state)
    }

    fn ping_frame(mcp_source: u16, crypto_source: u16) -> MeshFrame {
        MeshFrame {
            mcp_source,
            crypto_source,
            opcode: MODEL_OPCODE,
            payload: Bytes::from(vec![0x09, 0, 0, 1, 2, 3, 0, 0x09, 0x25, 134]),
        }
    }

    /// Queue a frame on the mock codec, then feed a dummy notification
    fn push_frame(
        session: &mut MeshSessionController,
        state: &Arc<Mutex<CodecState>>,
        frame: MeshFrame,
    ) -> Vec<SessionEvent> {
        state.lock().unwrap().frames.push_back(frame);
        session
            .handle_notification(Characteristic::Low, &[0], Instant::now())
            .unwrap()
    }

    #[test]
    fn test_readiness_requires_both_halves() {
        let now = Instant::now();
        let (codec, _state) = MockCodec::new();
        let mut session = MeshSessionController::new(Box::new(codec));
        assert!(!session.is_ready());

        let events = session.set_link_ready(true, now);
        assert!(events.is_empty());
        assert!(!session.is_ready());

        let events = session.init_crypto("hunter2").unwrap();
        assert_eq!(events, vec![SessionEvent::ReadinessChanged(true)]);
        assert!(session.is_ready());

        let events = session.set_link_ready(false, now);
        assert_eq!(events, vec![SessionEvent::ReadinessChanged(false)]);
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let (codec, _state) = MockCodec::new();
        let mut session = MeshSessionController::new(Box::new(codec));
        assert!(matches!(
            session.init_crypto(""),
            Err(MeshError::EmptyPassphrase)
        ));
        assert!(!session.crypto_ready());
    }

    #[test]
    fn test_send_rejected_when_not_ready() {
        let (codec, state) = MockCodec::new();
        let mut session = MeshSessionController::new(Box::new(codec));
        let result = session.send(Command::Brightness {
            target: 33000,
            level: 255,
        });
        assert!(matches!(result, Err(MeshError::NotReady)));
        assert!(state.lock().unwrap().encoded.is_empty());
    }

    #[test]
    fn test_send_encodes_when_ready() {
        let (mut session, state) = ready_session();
        let writes = session
            .send(Command::Brightness {
                target: 33000,
                level: 128,
            })
            .unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            state.lock().unwrap().encoded,
            vec![(33000, MODEL_OPCODE, vec![0x0A, 128])]
        );
    }

    #[test]
    fn test_discovery_sweep_dedup_and_finish() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_discovery(now).unwrap();

        // Five devices respond, one of them twice
        for id in [33001u16, 33002, 33003, 33004, 33005, 33003] {
            let events = push_frame(&mut session, &state, ping_frame(MCP_SOURCE_CRYPTO, id));
            assert!(events.is_empty());
        }

        let events = session.tick(now + DISCOVERY_WINDOW);
        match &events[..] {
            [SessionEvent::DiscoveryFinished { devices }] => {
                assert_eq!(devices.len(), 5);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(!session.is_discovering());
    }

    #[test]
    fn test_discovery_rejects_second_sweep() {
        let now = Instant::now();
        let (mut session, _state) = ready_session();
        session.start_discovery(now).unwrap();
        assert!(matches!(
            session.start_discovery(now),
            Err(MeshError::Busy("discovery sweep"))
        ));
    }

    #[test]
    fn test_discovery_skips_own_echo() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_discovery(now).unwrap();

        // mcp_source == 0 marks our own broadcast
        push_frame(&mut session, &state, ping_frame(0, 0));

        let events = session.tick(now + DISCOVERY_WINDOW);
        match &events[..] {
            [SessionEvent::DiscoveryFinished { devices }] => assert!(devices.is_empty()),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_examine_completes_on_target_response() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_examine(33007, now).unwrap();

        // A response from someone else is not the answer
        let events = push_frame(&mut session, &state, ping_frame(33001, 0));
        assert!(events.is_empty());

        let events = push_frame(&mut session, &state, ping_frame(33007, 0));
        match &events[..] {
            [SessionEvent::ExamineResult { device }] => {
                assert_eq!(device.device_id, 33007);
                assert_eq!(device.fw_version(), "1.2.3");
            }
            other => panic!("unexpected events: {other:?}"),
        }

        // Resolved: no timeout later
        assert!(session.tick(now + EXAMINE_TIMEOUT).is_empty());
    }

    #[test]
    fn test_examine_timeout_fires_once() {
        let now = Instant::now();
        let (mut session, _state) = ready_session();
        session.start_examine(33007, now).unwrap();

        let events = session.tick(now + EXAMINE_TIMEOUT);
        assert_eq!(events, vec![SessionEvent::ExamineTimeout { target: 33007 }]);
        assert!(session.tick(now + EXAMINE_TIMEOUT * 2).is_empty());
    }

    #[test]
    fn test_examine_single_flight() {
        let now = Instant::now();
        let (mut session, _state) = ready_session();
        session.start_examine(33007, now).unwrap();
        assert!(matches!(
            session.start_examine(33008, now),
            Err(MeshError::Busy("examine query"))
        ));
    }

    #[test]
    fn test_association_lifecycle_timeout_once() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_association(0xDEAD, 33009, now).unwrap();
        assert!(session.is_associating());
        assert_eq!(
            state.lock().unwrap().assoc_started,
            Some((0xDEAD, 33009u16))
        );
        assert!(matches!(
            session.start_association(0xBEEF, 33010, now),
            Err(MeshError::Busy("association"))
        ));

        // Before the deadline: still pending
        assert!(session.tick(now + Duration::from_secs(10)).is_empty());

        let late = now + ASSOCIATION_TIMEOUT + Duration::from_secs(1);
        let events = session.tick(late);
        assert_eq!(
            events,
            vec![SessionEvent::AssociationFailed {
                device_id: 33009,
                reason: "timeout".into(),
            }]
        );
        assert!(!session.is_associating());
        assert!(state.lock().unwrap().cancelled);

        // Polling again after the deadline produces nothing further
        assert!(session.tick(late + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_association_complete_event() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_association(0xDEAD, 33009, now).unwrap();

        state.lock().unwrap().assoc_result = AssociationPoll::Complete;
        let events = session.tick(now + Duration::from_secs(1));
        assert_eq!(
            events,
            vec![SessionEvent::AssociationComplete { device_id: 33009 }]
        );
        assert!(!session.is_associating());
    }

    #[test]
    fn test_link_loss_cancels_association_silently() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_association(0xDEAD, 33009, now).unwrap();

        let events = session.set_link_ready(false, now);
        // Only the readiness downgrade - no association failure event
        assert_eq!(events, vec![SessionEvent::ReadinessChanged(false)]);
        assert!(!session.is_associating());
        assert!(state.lock().unwrap().cancelled);
    }

    #[test]
    fn test_status_update_from_frame() {
        let (mut session, state) = ready_session();

        let frame = MeshFrame {
            mcp_source: 33000,
            crypto_source: 0,
            opcode: MODEL_OPCODE,
            payload: Bytes::from(vec![0x0B, 142]),
        };
        let events = push_frame(&mut session, &state, frame);
        assert_eq!(
            events,
            vec![SessionEvent::StatusUpdate(Status {
                avion_id: 33000,
                brightness: Some(142),
                color_temp: None,
            })]
        );
        assert_eq!(session.rx_count(), 1);
    }

    #[test]
    fn test_unassociated_scan_collects_hashes() {
        let now = Instant::now();
        let (mut session, state) = ready_session();
        session.start_unassociated_scan(now).unwrap();
        assert!(state.lock().unwrap().listening);

        state.lock().unwrap().unassoc_queue = vec![0xAA01, 0xAA02, 0xAA01];

        let events = session.tick(now + Duration::from_secs(1));
        assert_eq!(
            events,
            vec![
                SessionEvent::UnassociatedSeen { uuid_hash: 0xAA01 },
                SessionEvent::UnassociatedSeen { uuid_hash: 0xAA02 },
            ]
        );

        let events = session.tick(now + UNASSOCIATED_SCAN_WINDOW);
        assert_eq!(
            events,
            vec![SessionEvent::UnassociatedScanFinished {
                uuid_hashes: vec![0xAA01, 0xAA02],
            }]
        );
        assert!(!state.lock().unwrap().listening);
    }
}
