//! AvionMesh hub daemon
//!
//! Runs the hub control loop: bridge lifecycle, mesh session, action queue,
//! and the management command surface. Platform integrations (BLE stack,
//! mesh codec, MQTT client, web UI) plug in through the collaborator traits;
//! this binary wires logging stand-ins so the loop can be driven and
//! inspected from a terminal - management commands are read as JSON lines
//! from stdin and responses land in the log.

use std::time::{Duration, Instant};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use avion_bridge::{BdAddr, Transport};
use avion_hub::{
    AutomationBus, EventSink, HubConfigBuilder, HubOrchestrator, JsonStore,
};
use avion_mesh::{AssociationPoll, MeshCodec, MeshFrame, MeshWrite};

#[derive(Parser)]
#[command(name = "avion-hub")]
#[command(about = "AvionMesh hub: BLE lighting mesh to automation bus")]
struct Args {
    /// Registry snapshot path
    #[arg(long, default_value = "avionmesh.json")]
    db: String,

    /// Node name used in discovery unique ids
    #[arg(long, default_value = "avion-hub")]
    node_name: String,

    /// Topic prefix for light and management topics
    #[arg(long, default_value = "avion")]
    topic_prefix: String,

    /// Seed passphrase (applied only when storage has none)
    #[arg(long)]
    passphrase: Option<String>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// Transport placeholder until a platform BLE backend is wired in
///
/// Accepts every request and produces no events, so the hub idles in the
/// scan phase. Useful for exercising the management surface end to end.
struct NoopTransport;

impl Transport for NoopTransport {
    fn start_scan(&mut self, window: Duration) -> avion_bridge::Result<()> {
        debug!("noop transport: scan for {window:?}");
        Ok(())
    }

    fn connect(&mut self, address: BdAddr) -> avion_bridge::Result<()> {
        debug!("noop transport: connect {address}");
        Ok(())
    }

    fn discover_characteristics(&mut self) -> avion_bridge::Result<()> {
        Ok(())
    }

    fn subscribe_notify(&mut self, _handle: u16) -> avion_bridge::Result<()> {
        Ok(())
    }

    fn write(&mut self, _handle: u16, _data: &[u8], _with_response: bool) -> avion_bridge::Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> avion_bridge::Result<()> {
        Ok(())
    }
}

/// Codec placeholder until the mesh crypto library is linked in
struct NoopCodec;

impl MeshCodec for NoopCodec {
    fn init(&mut self, _passphrase: &str) -> avion_mesh::Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}

    fn is_initialized(&self) -> bool {
        true
    }

    fn encode(&mut self, _dest: u16, _opcode: u8, _payload: &[u8]) -> avion_mesh::Result<Vec<MeshWrite>> {
        Ok(Vec::new())
    }

    fn decode(
        &mut self,
        _characteristic: avion_core::Characteristic,
        _data: &[u8],
    ) -> avion_mesh::Result<Option<MeshFrame>> {
        Ok(None)
    }

    fn associate_start(&mut self, _uuid_hash: u32, _device_id: u16) -> avion_mesh::Result<()> {
        Ok(())
    }

    fn associate_poll(&mut self) -> AssociationPoll {
        AssociationPoll::InProgress
    }

    fn associate_cancel(&mut self) {}

    fn disassociate(&mut self, _device_id: u16) -> avion_mesh::Result<()> {
        Ok(())
    }

    fn listen_unassociated(&mut self, _enabled: bool) {}

    fn take_unassociated(&mut self) -> Vec<u32> {
        Vec::new()
    }
}

/// Bus stand-in that routes publishes to the log
struct LoggingBus;

impl AutomationBus for LoggingBus {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) {
        info!("bus publish {topic} retain={retain}: {payload}");
    }

    fn subscribe(&mut self, topic: &str) {
        debug!("bus subscribe {topic}");
    }
}

/// Sink stand-in that routes UI events to the log
struct LoggingSink;

impl EventSink for LoggingSink {
    fn emit(&mut self, event: &str, payload: serde_json::Value) {
        debug!("ui event {event}: {payload}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting AvionMesh hub: {}", args.node_name);

    let mut builder = HubConfigBuilder::new()
        .node_name(&args.node_name)
        .topic_prefix(&args.topic_prefix);
    if let Some(passphrase) = &args.passphrase {
        builder = builder.passphrase(passphrase);
    }
    let config = builder.build();

    let mut hub = HubOrchestrator::new(
        config,
        Box::new(NoopTransport),
        Box::new(NoopCodec),
        Box::new(JsonStore::new(&args.db)),
        Box::new(LoggingBus),
        Box::new(LoggingSink),
    );
    info!("Registry: {}", args.db);

    // Management commands arrive as JSON lines on stdin
    let (mgmt_tx, mut mgmt_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() && mgmt_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    hub.start(Instant::now());

    let mut tick = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                hub.tick(Instant::now());
            }
            Some(line) = mgmt_rx.recv() => {
                hub.handle_management_command(&line, Instant::now());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
