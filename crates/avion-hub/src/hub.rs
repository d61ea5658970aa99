//! Hub orchestrator
//!
//! One instance owns the whole pipeline. Each control-loop iteration calls
//! [`HubOrchestrator::tick`], which advances the bridge state machine,
//! polls the session deadlines and the claim handshake, drains the action
//! queue, and republishes state. Transport events and management commands
//! are fed in between ticks by the hosting loop; request handlers on other
//! threads only ever touch the [`ActionQueue`] handle.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{Datelike, Local, Timelike};
use serde_json::{json, Value};
use tracing::{info, warn};

use avion_bridge::{BridgeConnectionManager, LinkEvent, Transport, TransportEvent};
use avion_core::{
    has_color_temp, has_dimming, product_name, AvionId, DeviceState, DiscoveredDevice,
};
use avion_mesh::{Command, MeshCodec, MeshError, MeshSessionController, MeshWrite, SessionEvent};

use crate::config::HubConfig;
use crate::discovery::{AutomationBus, BusDiscovery};
use crate::events::EventSink;
use crate::queue::{ActionQueue, PendingAction};
use crate::registry::DeviceRegistry;
use crate::storage::Storage;

/// Delay from link-up to the initial brightness read-back
const INITIAL_READ_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Delay from the brightness read-back to the color read-back
const INITIAL_COLOR_READ_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

/// Delay from link-up to the first mesh time sync
const INITIAL_TIME_SYNC_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// Spacing of the recurring mesh time sync
const TIME_SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Which light command topic a bus payload arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightTopic {
    /// Plain ON/OFF topic
    Switch,
    /// Numeric brightness topic
    Brightness,
    /// Mireds color-temperature topic
    ColorTemp,
}

/// Translate a raw bus light command into a queue action
///
/// Runs on the bus subscription thread; the result is pushed onto the
/// [`ActionQueue`] and applied by the control loop.
pub fn parse_light_command(id: AvionId, topic: LightTopic, payload: &str) -> PendingAction {
    match topic {
        LightTopic::Switch => PendingAction::Control {
            id,
            brightness: Some(if payload == "ON" { 255 } else { 0 }),
            color_temp: None,
        },
        LightTopic::Brightness => PendingAction::Control {
            id,
            brightness: Some(payload.trim().parse().unwrap_or(0)),
            color_temp: None,
        },
        LightTopic::ColorTemp => {
            let mireds: u32 = payload.trim().parse().unwrap_or(0);
            let kelvin = if mireds > 0 { 1_000_000 / mireds } else { 3000 };
            PendingAction::Control {
                id,
                brightness: None,
                color_temp: Some(kelvin as u16),
            }
        }
    }
}

struct AutoClaim {
    uuid_hash: u32,
    name: String,
    product_type: u8,
}

/// Owns the bridge, session, catalog, and cached state; one per process
pub struct HubOrchestrator {
    config: HubConfig,
    bridge: BridgeConnectionManager,
    session: MeshSessionController,
    registry: DeviceRegistry,
    queue: ActionQueue,
    discovery: BusDiscovery,
    bus: Box<dyn AutomationBus>,
    sink: Box<dyn EventSink>,
    device_states: HashMap<AvionId, DeviceState>,
    last_discovered: Vec<DiscoveredDevice>,
    pending_auto_claim: Option<AutoClaim>,
    last_brightness_at: HashMap<AvionId, Instant>,
    lights_subscribed: bool,
    read_dimming_at: Option<Instant>,
    read_color_at: Option<Instant>,
    time_sync_at: Option<Instant>,
}

impl HubOrchestrator {
    /// Wire up the hub from its collaborators
    pub fn new(
        config: HubConfig,
        transport: Box<dyn Transport>,
        codec: Box<dyn MeshCodec>,
        store: Box<dyn Storage>,
        bus: Box<dyn AutomationBus>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let mut registry = DeviceRegistry::load(store);

        // A configured passphrase only seeds empty storage
        if let Some(passphrase) = &config.passphrase {
            if registry.passphrase().is_empty() && !passphrase.is_empty() {
                info!("Initializing passphrase from configuration");
                registry.set_passphrase(passphrase);
            }
        }

        let bridge = BridgeConnectionManager::with_timing(
            transport,
            config.scan_window,
            config.reconnect_delay,
        );
        let mut session = MeshSessionController::new(codec).with_timing(
            config.discovery_window,
            config.examine_timeout,
            config.association_timeout,
        );

        if registry.passphrase().is_empty() {
            warn!("No passphrase set - mesh operations disabled until one is configured");
        } else if let Err(e) = session.init_crypto(registry.passphrase()) {
            warn!("Mesh crypto initialization failed: {e}");
        }

        let discovery = BusDiscovery::new(&config.node_name, &config.topic_prefix);
        info!(
            "Hub initialized with {} devices, {} groups",
            registry.devices().len(),
            registry.groups().len()
        );

        Self {
            config,
            bridge,
            session,
            registry,
            queue: ActionQueue::new(),
            discovery,
            bus,
            sink,
            device_states: HashMap::new(),
            last_discovered: Vec::new(),
            pending_auto_claim: None,
            last_brightness_at: HashMap::new(),
            lights_subscribed: false,
            read_dimming_at: None,
            read_color_at: None,
            time_sync_at: None,
        }
    }

    /// Begin the bridge lifecycle
    pub fn start(&mut self, now: Instant) {
        self.bus.subscribe(&self.discovery.management_command_topic());
        self.bridge.start_scan(now);
    }

    /// Cloneable handle for request handlers
    pub fn queue(&self) -> ActionQueue {
        self.queue.clone()
    }

    /// The device/group catalog
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Cached light state, if any has been observed
    pub fn device_state(&self, id: AvionId) -> Option<&DeviceState> {
        self.device_states.get(&id)
    }

    /// Whether mesh traffic is currently possible
    pub fn is_mesh_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// One control-loop iteration
    pub fn tick(&mut self, now: Instant) {
        self.bridge.tick(now);

        let events = self.session.tick(now);
        self.handle_session_events(events, now);

        for action in self.queue.drain() {
            self.process_action(action, now);
        }

        if deadline_due(&mut self.read_dimming_at, now) {
            self.send_mesh(Command::ReadAllDimming);
        }
        if deadline_due(&mut self.read_color_at, now) {
            self.send_mesh(Command::ReadAllColor);
        }
        if deadline_due(&mut self.time_sync_at, now) {
            self.sync_time();
            self.time_sync_at = Some(now + TIME_SYNC_INTERVAL);
        }
    }

    /// Feed one transport event into the bridge state machine
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match self.bridge.handle_event(event, now) {
            Some(LinkEvent::Ready) => {
                let events = self.session.set_link_ready(true, now);
                self.handle_session_events(events, now);
                self.on_link_ready(now);
            }
            Some(LinkEvent::Lost) => {
                let events = self.session.set_link_ready(false, now);
                self.handle_session_events(events, now);
                self.lights_subscribed = false;
                self.read_dimming_at = None;
                self.read_color_at = None;
                self.time_sync_at = None;
            }
            Some(LinkEvent::Notification {
                characteristic,
                data,
            }) => match self.session.handle_notification(characteristic, &data, now) {
                Ok(events) => self.handle_session_events(events, now),
                Err(e) => warn!("Dropping undecodable notification: {e}"),
            },
            None => {}
        }
    }

    /// Dispatch one management command from the bus
    pub fn handle_management_command(&mut self, payload: &str, now: Instant) {
        info!("Management command: {payload}");

        let root: Value = match serde_json::from_str(payload) {
            Ok(root) => root,
            Err(e) => {
                warn!("Unparseable management command: {e}");
                self.respond(json!({
                    "action": "unknown",
                    "status": "error",
                    "message": "invalid_json",
                }));
                return;
            }
        };
        let action = root["action"].as_str().unwrap_or("").to_string();

        // These work regardless of link state
        match action.as_str() {
            "status" => {
                self.respond(json!({
                    "action": "status",
                    "ble_state": self.bridge.state().to_string(),
                    "devices": self.registry.devices().len(),
                    "groups": self.registry.groups().len(),
                    "rx_count": self.session.rx_count(),
                }));
                return;
            }
            "set_passphrase" => {
                let passphrase = root["passphrase"].as_str().unwrap_or("").to_string();
                self.handle_set_passphrase(&passphrase, now);
                return;
            }
            "generate_passphrase" => {
                self.handle_generate_passphrase(now);
                return;
            }
            "factory_reset" => {
                self.handle_factory_reset(now);
                return;
            }
            _ => {}
        }

        if !self.bridge.is_ready() {
            self.respond(json!({
                "action": action,
                "status": "error",
                "message": "ble_not_ready",
                "ble_state": self.bridge.state().to_string(),
            }));
            return;
        }

        match action.as_str() {
            "scan_unassociated" => self.handle_scan_unassociated(now),
            "claim_device" => {
                let uuid_hash = root["uuid_hash"].as_u64().unwrap_or(0) as u32;
                let device_id = root["device_id"].as_u64().unwrap_or(0) as AvionId;
                let name = root["name"].as_str().unwrap_or("Unknown").to_string();
                let product_type = root["product_type"].as_u64().unwrap_or(0) as u8;
                if device_id == 0 {
                    self.handle_claim_device_auto(uuid_hash, &name, product_type, now);
                } else {
                    self.handle_claim_device(uuid_hash, device_id, &name, product_type, now);
                }
            }
            "unclaim_device" => {
                let avion_id = root["avion_id"].as_u64().unwrap_or(0) as AvionId;
                self.handle_unclaim_device(avion_id);
            }
            "create_group" => {
                let group_id = root["group_id"].as_u64().unwrap_or(0) as AvionId;
                let name = root["name"].as_str().unwrap_or("Group").to_string();
                self.handle_create_group(group_id, &name);
            }
            "delete_group" => {
                let group_id = root["group_id"].as_u64().unwrap_or(0) as AvionId;
                self.handle_delete_group(group_id);
            }
            "add_to_group" => {
                let avion_id = root["avion_id"].as_u64().unwrap_or(0) as AvionId;
                let group_id = root["group_id"].as_u64().unwrap_or(0) as AvionId;
                self.handle_add_to_group(avion_id, group_id);
            }
            "remove_from_group" => {
                let avion_id = root["avion_id"].as_u64().unwrap_or(0) as AvionId;
                let group_id = root["group_id"].as_u64().unwrap_or(0) as AvionId;
                self.handle_remove_from_group(avion_id, group_id);
            }
            "discover_mesh" => self.handle_discover_mesh(now),
            "add_discovered" => {
                let device_id = root["device_id"].as_u64().unwrap_or(0) as AvionId;
                let name = root["name"].as_str().unwrap_or("Unknown").to_string();
                let product_type = root["product_type"].as_u64().unwrap_or(0) as u8;
                self.handle_add_discovered(device_id, &name, product_type);
            }
            "examine_device" => {
                let avion_id = root["avion_id"].as_u64().unwrap_or(0) as AvionId;
                self.handle_examine_device(avion_id, now);
            }
            "set_mesh_brightness" => {
                let level = root["brightness"].as_u64().unwrap_or(0) as u8;
                self.send_mesh(Command::Brightness { target: 0, level });
            }
            "set_mesh_color_temp" => {
                let kelvin = root["kelvin"].as_u64().unwrap_or(3000) as u16;
                self.send_mesh(Command::ColorTemp { target: 0, kelvin });
            }
            "sync_time" => self.sync_time(),
            "read_all" => {
                self.send_mesh(Command::ReadAllDimming);
            }
            other => {
                warn!("Unknown action: {other}");
                self.respond(json!({
                    "action": other,
                    "status": "error",
                    "message": "unknown_action",
                }));
            }
        }
    }

    /* ---- Session event fan-out ---- */

    fn handle_session_events(&mut self, events: Vec<SessionEvent>, now: Instant) {
        for event in events {
            match event {
                SessionEvent::ReadinessChanged(_) => self.emit_meta(),

                SessionEvent::StatusUpdate(status) => {
                    if self.registry.find_device(status.avion_id).is_none() {
                        continue;
                    }
                    let state = self.device_states.entry(status.avion_id).or_default();
                    if let Some(brightness) = status.brightness {
                        state.set_brightness(brightness);
                    }
                    if let Some(kelvin) = status.color_temp {
                        state.set_color_temp(kelvin);
                    }
                    self.publish_device_state(status.avion_id);
                }

                SessionEvent::DiscoveryFinished { devices } => {
                    self.last_discovered = devices;
                    match self.pending_auto_claim.take() {
                        Some(auto) => self.finish_auto_claim(auto, now),
                        None => self.report_discovery_results(),
                    }
                }

                SessionEvent::UnassociatedSeen { uuid_hash } => {
                    self.respond(json!({
                        "action": "scan_unassociated",
                        "uuid_hash": format!("0x{uuid_hash:08x}"),
                    }));
                }

                SessionEvent::UnassociatedScanFinished { uuid_hashes } => {
                    let hashes: Vec<String> =
                        uuid_hashes.iter().map(|h| format!("0x{h:08x}")).collect();
                    self.sink
                        .emit("scan_unassoc", json!({ "uuid_hashes": hashes }));
                    self.respond(json!({
                        "action": "scan_unassociated",
                        "status": "done",
                    }));
                }

                SessionEvent::ExamineResult { device } => {
                    let fields = json!({
                        "avion_id": device.device_id,
                        "fw": device.fw_version(),
                        "flags": device.flags,
                        "vendor_id": device.vendor_id,
                        "product_id": device.product_id,
                    });
                    self.sink.emit("examine", fields.clone());
                    let mut response = fields;
                    response["action"] = json!("examine_device");
                    response["status"] = json!("ok");
                    self.respond(response);
                }

                SessionEvent::ExamineTimeout { target } => {
                    self.sink.emit(
                        "examine",
                        json!({ "avion_id": target, "error": "timeout" }),
                    );
                    self.respond(json!({
                        "action": "examine_device",
                        "avion_id": target,
                        "status": "error",
                        "message": "timeout",
                    }));
                }

                SessionEvent::AssociationComplete { device_id } => {
                    self.respond(json!({
                        "action": "claim_device",
                        "device_id": device_id,
                        "status": "ok",
                    }));
                }

                SessionEvent::AssociationFailed { device_id, reason } => {
                    self.respond(json!({
                        "action": "claim_device",
                        "device_id": device_id,
                        "status": "error",
                        "message": reason,
                    }));
                }
            }
        }
    }

    /* ---- Deferred action processing ---- */

    fn process_action(&mut self, action: PendingAction, now: Instant) {
        match action {
            PendingAction::Control {
                id,
                brightness,
                color_temp,
            } => {
                if let Some(level) = brightness {
                    // Rapid dimming: ride the slider locally, spare the mesh
                    let throttled = self
                        .last_brightness_at
                        .get(&id)
                        .is_some_and(|&at| now.duration_since(at) < self.config.rapid_dim_threshold);
                    self.last_brightness_at.insert(id, now);

                    if !throttled {
                        self.send_mesh(Command::Brightness { target: id, level });
                    }
                    self.device_states.entry(id).or_default().set_brightness(level);
                    self.publish_device_state(id);
                }
                if let Some(kelvin) = color_temp {
                    self.send_mesh(Command::ColorTemp { target: id, kelvin });
                    self.device_states.entry(id).or_default().set_color_temp(kelvin);
                    self.publish_device_state(id);
                }
            }

            PendingAction::AddDiscovered {
                id,
                name,
                product_type,
            } => {
                if self.handle_add_discovered(id, &name, product_type) {
                    self.sink.emit(
                        "device_added",
                        json!({
                            "avion_id": id,
                            "name": name,
                            "product_type": product_type,
                            "product_name": product_name(product_type),
                            "groups": [],
                        }),
                    );
                }
            }

            PendingAction::Unclaim { id } => {
                self.handle_unclaim_device(id);
                self.sink.emit("device_removed", json!({ "avion_id": id }));
            }

            PendingAction::CreateGroup { name } => {
                if let Some(group_id) = self.registry.next_group_id() {
                    self.handle_create_group(group_id, &name);
                    self.sink.emit(
                        "group_added",
                        json!({ "group_id": group_id, "name": name, "members": [] }),
                    );
                }
            }

            PendingAction::DeleteGroup { id } => {
                self.handle_delete_group(id);
                self.sink.emit("group_removed", json!({ "group_id": id }));
            }

            PendingAction::AddToGroup { id, group } => {
                self.handle_add_to_group(id, group);
                self.emit_group_updated(group);
            }

            PendingAction::RemoveFromGroup { id, group } => {
                self.handle_remove_from_group(id, group);
                self.emit_group_updated(group);
            }

            PendingAction::Import { body } => self.process_import(&body, now),
        }
    }

    /* ---- Management handlers ---- */

    fn handle_scan_unassociated(&mut self, now: Instant) {
        if let Err(e) = self.session.start_unassociated_scan(now) {
            self.respond(json!({
                "action": "scan_unassociated",
                "status": "error",
                "message": e.code(),
            }));
        }
    }

    fn handle_claim_device(
        &mut self,
        uuid_hash: u32,
        device_id: AvionId,
        name: &str,
        product_type: u8,
        now: Instant,
    ) {
        if self.session.is_associating() {
            self.respond(json!({
                "action": "claim_device",
                "status": "error",
                "message": "busy",
            }));
            return;
        }

        if let Err(e) = self.session.start_association(uuid_hash, device_id, now) {
            warn!("Association start failed: {e}");
            self.respond(json!({
                "action": "claim_device",
                "status": "error",
                "message": e.code(),
            }));
            return;
        }

        // Registration happens at claim time, before the handshake settles;
        // a failed claim leaves a device the operator can unclaim
        let has_dim = has_dimming(product_type);
        let has_ct = has_color_temp(product_type);
        self.registry.add_device(device_id, product_type, name);
        self.discovery.publish_light(
            self.bus.as_mut(),
            device_id,
            name,
            has_dim,
            has_ct,
            Some(product_name(product_type)),
        );
        self.subscribe_light_topics(device_id, has_dim, has_ct);
    }

    fn handle_claim_device_auto(
        &mut self,
        uuid_hash: u32,
        name: &str,
        product_type: u8,
        now: Instant,
    ) {
        info!("Starting auto-claim: mesh ping to verify available ids");
        match self.session.start_discovery(now) {
            Ok(writes) => {
                self.dispatch_writes(writes);
                self.pending_auto_claim = Some(AutoClaim {
                    uuid_hash,
                    name: name.to_string(),
                    product_type,
                });
            }
            Err(e) => {
                self.respond(json!({
                    "action": "claim_device",
                    "status": "error",
                    "message": e.code(),
                }));
            }
        }
    }

    fn finish_auto_claim(&mut self, auto: AutoClaim, now: Instant) {
        let Some(device_id) = self.registry.next_device_id(&self.last_discovered) else {
            warn!("No available device ids");
            self.sink.emit(
                "claim_result",
                json!({ "status": "error", "message": "no_available_ids" }),
            );
            self.respond(json!({
                "action": "claim_device",
                "status": "error",
                "message": "no_available_ids",
            }));
            return;
        };

        info!("Auto-claim assigning device id {device_id}");
        self.sink.emit(
            "claim_result",
            json!({ "status": "ok", "device_id": device_id }),
        );
        self.handle_claim_device(auto.uuid_hash, device_id, &auto.name, auto.product_type, now);
    }

    fn handle_unclaim_device(&mut self, avion_id: AvionId) {
        info!("Unclaiming device {avion_id}");

        self.session.cancel_association();
        if let Err(e) = self.session.disassociate(avion_id) {
            warn!("Disassociate failed: {e}");
        }
        self.registry.remove_device(avion_id);
        self.discovery.remove_light(self.bus.as_mut(), avion_id);
        self.device_states.remove(&avion_id);

        self.respond(json!({
            "action": "unclaim_device",
            "avion_id": avion_id,
            "status": "ok",
        }));
    }

    fn handle_create_group(&mut self, group_id: AvionId, name: &str) {
        self.registry.add_group(group_id, name);
        self.discovery
            .publish_light(self.bus.as_mut(), group_id, name, true, true, None);
        self.subscribe_light_topics(group_id, true, true);

        self.respond(json!({
            "action": "create_group",
            "group_id": group_id,
            "status": "ok",
        }));
    }

    fn handle_delete_group(&mut self, group_id: AvionId) {
        self.registry.remove_group(group_id);
        self.discovery.remove_light(self.bus.as_mut(), group_id);

        self.respond(json!({
            "action": "delete_group",
            "group_id": group_id,
            "status": "ok",
        }));
    }

    fn handle_add_to_group(&mut self, avion_id: AvionId, group_id: AvionId) {
        self.send_mesh(Command::InsertGroup {
            device: avion_id,
            group: group_id,
        });
        self.registry.add_device_to_group(avion_id, group_id);

        self.respond(json!({
            "action": "add_to_group",
            "avion_id": avion_id,
            "group_id": group_id,
            "status": "ok",
        }));
    }

    fn handle_remove_from_group(&mut self, avion_id: AvionId, group_id: AvionId) {
        self.send_mesh(Command::DeleteGroup {
            device: avion_id,
            group: group_id,
        });
        self.registry.remove_device_from_group(avion_id, group_id);

        self.respond(json!({
            "action": "remove_from_group",
            "avion_id": avion_id,
            "group_id": group_id,
            "status": "ok",
        }));
    }

    fn handle_discover_mesh(&mut self, now: Instant) {
        match self.session.start_discovery(now) {
            Ok(writes) => self.dispatch_writes(writes),
            Err(e) => {
                self.respond(json!({
                    "action": "discover_mesh",
                    "status": "error",
                    "message": e.code(),
                }));
            }
        }
    }

    fn handle_add_discovered(&mut self, device_id: AvionId, name: &str, product_type: u8) -> bool {
        if self.registry.find_device(device_id).is_some() {
            self.respond(json!({
                "action": "add_discovered",
                "device_id": device_id,
                "status": "error",
                "message": "already_exists",
            }));
            return false;
        }

        info!("Adding discovered device: id={device_id}, name={name}, product_type={product_type}");
        let has_dim = has_dimming(product_type);
        let has_ct = has_color_temp(product_type);
        self.registry.add_device(device_id, product_type, name);
        self.discovery.publish_light(
            self.bus.as_mut(),
            device_id,
            name,
            has_dim,
            has_ct,
            Some(product_name(product_type)),
        );
        self.subscribe_light_topics(device_id, has_dim, has_ct);

        self.respond(json!({
            "action": "add_discovered",
            "device_id": device_id,
            "status": "ok",
        }));
        true
    }

    fn handle_examine_device(&mut self, avion_id: AvionId, now: Instant) {
        match self.session.start_examine(avion_id, now) {
            Ok(writes) => self.dispatch_writes(writes),
            Err(e) => {
                self.respond(json!({
                    "action": "examine_device",
                    "status": "error",
                    "message": e.code(),
                }));
            }
        }
    }

    fn handle_set_passphrase(&mut self, passphrase: &str, now: Instant) {
        info!("Setting passphrase (length={})", passphrase.len());
        self.registry.set_passphrase(passphrase);

        if !self.reinit_crypto(now) {
            self.respond(json!({
                "action": "set_passphrase",
                "status": "error",
                "message": "crypto_init_failed",
            }));
            return;
        }

        self.respond(json!({ "action": "set_passphrase", "status": "ok" }));
    }

    fn handle_generate_passphrase(&mut self, now: Instant) {
        let passphrase = self.registry.generate_passphrase().to_string();
        info!("Generated new passphrase");

        if !self.reinit_crypto(now) {
            self.respond(json!({
                "action": "generate_passphrase",
                "status": "error",
                "message": "crypto_init_failed",
            }));
            return;
        }

        self.respond(json!({
            "action": "generate_passphrase",
            "status": "ok",
            "passphrase": passphrase,
        }));
    }

    fn handle_factory_reset(&mut self, now: Instant) {
        info!("Factory reset: clearing all devices, groups, and passphrase");

        let ids: Vec<AvionId> = self
            .registry
            .devices()
            .iter()
            .map(|d| d.avion_id)
            .chain(self.registry.groups().iter().map(|g| g.group_id))
            .collect();
        for id in ids {
            self.discovery.remove_light(self.bus.as_mut(), id);
        }

        let events = self.session.reset_crypto();
        self.handle_session_events(events, now);
        self.registry.clear();
        self.device_states.clear();
        self.last_discovered.clear();

        self.respond(json!({ "action": "factory_reset", "status": "ok" }));
    }

    /* ---- Bulk import ---- */

    fn process_import(&mut self, body: &str, now: Instant) {
        let root: Value = match serde_json::from_str(body) {
            Ok(root) => root,
            Err(e) => {
                warn!("Unparseable import payload: {e}");
                self.sink.emit(
                    "import_result",
                    json!({ "status": "error", "message": "invalid_json" }),
                );
                return;
            }
        };

        if root["reset"].as_bool().unwrap_or(false) {
            info!("Import with reset: clearing existing data");
            let ids: Vec<AvionId> = self
                .registry
                .devices()
                .iter()
                .map(|d| d.avion_id)
                .chain(self.registry.groups().iter().map(|g| g.group_id))
                .collect();
            for id in ids {
                self.discovery.remove_light(self.bus.as_mut(), id);
            }
            self.registry.clear();
            self.device_states.clear();
        }

        if let Some(passphrase) = root["passphrase"].as_str() {
            info!("Setting passphrase from import (len={})", passphrase.len());
            self.registry.set_passphrase(passphrase);
            let events = self.session.reset_crypto();
            self.handle_session_events(events, now);
            match self.session.init_crypto(passphrase) {
                Ok(events) => self.handle_session_events(events, now),
                Err(e) => {
                    warn!("Failed to initialize crypto with imported passphrase: {e}");
                    self.sink.emit(
                        "import_result",
                        json!({ "status": "error", "message": "crypto_init_failed" }),
                    );
                    return;
                }
            }
        }

        let mut added_devices = 0;
        let mut added_groups = 0;

        if let Some(devices) = root["devices"].as_array() {
            for dev in devices {
                let device_id = dev["device_id"].as_u64().unwrap_or(0) as AvionId;
                let name = dev["name"].as_str().unwrap_or("Unknown");
                let product_type = dev["product_type"].as_u64().unwrap_or(0) as u8;
                if device_id == 0 || self.registry.find_device(device_id).is_some() {
                    continue;
                }

                self.registry.add_device(device_id, product_type, name);
                self.discovery.publish_light(
                    self.bus.as_mut(),
                    device_id,
                    name,
                    has_dimming(product_type),
                    has_color_temp(product_type),
                    Some(product_name(product_type)),
                );
                added_devices += 1;
            }
        }

        if let Some(groups) = root["groups"].as_array() {
            for grp in groups {
                let group_id = grp["group_id"].as_u64().unwrap_or(0) as AvionId;
                let name = grp["name"].as_str().unwrap_or("Group");
                if group_id == 0 {
                    continue;
                }
                if self.registry.find_group(group_id).is_none() {
                    self.registry.add_group(group_id, name);
                    self.discovery
                        .publish_light(self.bus.as_mut(), group_id, name, true, true, None);
                    added_groups += 1;
                }

                if let Some(members) = grp["members"].as_array() {
                    for member in members {
                        let member_id = member.as_u64().unwrap_or(0) as AvionId;
                        if member_id > 0 {
                            self.registry.add_device_to_group(member_id, group_id);
                            // Re-issued even for pre-existing memberships;
                            // the mesh command is idempotent
                            self.send_mesh(Command::InsertGroup {
                                device: member_id,
                                group: group_id,
                            });
                        }
                    }
                }
            }
        }

        self.publish_all_discovery();
        self.subscribe_all_commands();

        self.sink.emit(
            "import_result",
            json!({ "added_devices": added_devices, "added_groups": added_groups }),
        );
    }

    /* ---- Helpers ---- */

    fn on_link_ready(&mut self, now: Instant) {
        if !self.lights_subscribed {
            info!("Link ready, publishing discovery and subscribing light commands");
            self.publish_all_discovery();
            self.subscribe_all_commands();
            self.lights_subscribed = true;
            self.read_dimming_at = Some(now + INITIAL_READ_DELAY);
            self.read_color_at = Some(now + INITIAL_COLOR_READ_DELAY);
            self.time_sync_at = Some(now + INITIAL_TIME_SYNC_DELAY);
        }
    }

    fn report_discovery_results(&mut self) {
        let devices: Vec<Value> = self
            .last_discovered
            .iter()
            .map(|d| {
                json!({
                    "device_id": d.device_id,
                    "fw": d.fw_version(),
                    "vendor_id": d.vendor_id,
                    "product_id": d.product_id,
                    "known": self.registry.find_device(d.device_id).is_some(),
                })
            })
            .collect();

        self.sink
            .emit("discover_mesh", json!({ "devices": devices.clone() }));
        self.respond(json!({
            "action": "discover_mesh",
            "status": "done",
            "devices": devices,
        }));
    }

    fn emit_group_updated(&mut self, group_id: AvionId) {
        if let Some(group) = self.registry.find_group(group_id) {
            let payload = json!({
                "group_id": group.group_id,
                "name": group.name.clone(),
                "members": group.member_ids.clone(),
            });
            self.sink.emit("group_updated", payload);
        }
    }

    fn emit_meta(&mut self) {
        self.sink.emit(
            "meta",
            json!({
                "ble_state": self.bridge.state().to_string(),
                "mesh_ready": self.session.is_ready(),
                "rx_count": self.session.rx_count(),
            }),
        );
    }

    fn reinit_crypto(&mut self, now: Instant) -> bool {
        let events = self.session.reset_crypto();
        self.handle_session_events(events, now);

        let passphrase = self.registry.passphrase().to_string();
        match self.session.init_crypto(&passphrase) {
            Ok(events) => {
                self.handle_session_events(events, now);
                // Kick the link if it is down so the new session gets used
                self.bridge.reconnect_now(now);
                true
            }
            Err(e) => {
                warn!("Crypto reinitialization failed: {e}");
                false
            }
        }
    }

    fn send_mesh(&mut self, cmd: Command) -> bool {
        match self.session.send(cmd) {
            Ok(writes) => {
                self.dispatch_writes(writes);
                true
            }
            Err(MeshError::NotReady) => false,
            Err(e) => {
                warn!("Mesh command failed: {e}");
                false
            }
        }
    }

    fn dispatch_writes(&mut self, writes: Vec<MeshWrite>) {
        for write in writes {
            if let Err(e) = self
                .bridge
                .write(write.characteristic, &write.data, write.with_response)
            {
                warn!("Bridge write failed: {e}");
            }
        }
    }

    fn publish_device_state(&mut self, avion_id: AvionId) {
        let Some(state) = self.device_states.get(&avion_id).copied() else {
            return;
        };
        if !state.brightness_known {
            return;
        }
        let Some(device) = self.registry.find_device(avion_id) else {
            return;
        };
        let ct_capable = has_color_temp(device.product_type);

        self.discovery
            .publish_on_off_state(self.bus.as_mut(), avion_id, state.brightness > 0);
        self.discovery
            .publish_brightness_state(self.bus.as_mut(), avion_id, state.brightness);
        if state.color_temp_known && ct_capable {
            self.discovery
                .publish_color_temp_state(self.bus.as_mut(), avion_id, state.color_temp);
        }

        let mut payload = json!({
            "avion_id": avion_id,
            "brightness": state.brightness,
        });
        if state.color_temp_known {
            payload["color_temp"] = json!(state.color_temp);
        }
        self.sink.emit("state", payload);
    }

    fn publish_all_discovery(&mut self) {
        let devices: Vec<(AvionId, u8, String)> = self
            .registry
            .devices()
            .iter()
            .map(|d| (d.avion_id, d.product_type, d.name.clone()))
            .collect();
        for (id, product_type, name) in devices {
            self.discovery.publish_light(
                self.bus.as_mut(),
                id,
                &name,
                has_dimming(product_type),
                has_color_temp(product_type),
                Some(product_name(product_type)),
            );
        }

        let groups: Vec<(AvionId, String)> = self
            .registry
            .groups()
            .iter()
            .map(|g| (g.group_id, g.name.clone()))
            .collect();
        for (id, name) in groups {
            self.discovery
                .publish_light(self.bus.as_mut(), id, &name, true, true, None);
        }
    }

    fn subscribe_all_commands(&mut self) {
        let devices: Vec<(AvionId, u8)> = self
            .registry
            .devices()
            .iter()
            .map(|d| (d.avion_id, d.product_type))
            .collect();
        for (id, product_type) in devices {
            self.subscribe_light_topics(
                id,
                has_dimming(product_type),
                has_color_temp(product_type),
            );
        }

        let groups: Vec<AvionId> = self.registry.groups().iter().map(|g| g.group_id).collect();
        for id in groups {
            self.subscribe_light_topics(id, true, true);
        }
    }

    fn subscribe_light_topics(&mut self, id: AvionId, has_brightness: bool, has_ct: bool) {
        self.bus.subscribe(&self.discovery.command_topic(id));
        if has_brightness {
            self.bus
                .subscribe(&self.discovery.brightness_command_topic(id));
        }
        if has_ct {
            self.bus
                .subscribe(&self.discovery.color_temp_command_topic(id));
        }
    }

    fn sync_time(&mut self) {
        let local = Local::now();
        if local.year() < 2020 {
            // Clock not set yet; a bogus date confuses schedule-capable devices
            return;
        }

        info!("Syncing mesh time: {}", local.format("%Y-%m-%d %H:%M:%S"));
        self.send_mesh(Command::SetDate {
            year: local.year() as u16,
            month: local.month() as u8,
            day: local.day() as u8,
        });
        self.send_mesh(Command::SetTime {
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
        });
    }

    fn respond(&mut self, payload: Value) {
        self.bus.publish(
            &self.discovery.management_response_topic(),
            &payload.to_string(),
            false,
        );
    }
}

/// Clear and report a deadline slot once it passes
fn deadline_due(slot: &mut Option<Instant>, now: Instant) -> bool {
    if slot.is_some_and(|at| now >= at) {
        *slot = None;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switch_command() {
        assert_eq!(
            parse_light_command(33000, LightTopic::Switch, "ON"),
            PendingAction::Control {
                id: 33000,
                brightness: Some(255),
                color_temp: None,
            }
        );
        assert_eq!(
            parse_light_command(33000, LightTopic::Switch, "OFF"),
            PendingAction::Control {
                id: 33000,
                brightness: Some(0),
                color_temp: None,
            }
        );
    }

    #[test]
    fn test_parse_brightness_command() {
        assert_eq!(
            parse_light_command(33000, LightTopic::Brightness, "128"),
            PendingAction::Control {
                id: 33000,
                brightness: Some(128),
                color_temp: None,
            }
        );
        // Garbage falls back to 0 rather than being dropped
        assert_eq!(
            parse_light_command(33000, LightTopic::Brightness, "bogus"),
            PendingAction::Control {
                id: 33000,
                brightness: Some(0),
                color_temp: None,
            }
        );
    }

    #[test]
    fn test_parse_color_temp_mireds_to_kelvin() {
        assert_eq!(
            parse_light_command(33000, LightTopic::ColorTemp, "250"),
            PendingAction::Control {
                id: 33000,
                brightness: None,
                color_temp: Some(4000),
            }
        );
        // Zero mireds falls back to 3000 K
        assert_eq!(
            parse_light_command(33000, LightTopic::ColorTemp, "0"),
            PendingAction::Control {
                id: 33000,
                brightness: None,
                color_temp: Some(3000),
            }
        );
    }
}
