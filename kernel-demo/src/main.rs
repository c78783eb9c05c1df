//! Wires two in-process kernels together over a real loopback TCP
//! connection and sends one `deliver` message end to end, to exercise
//! `kernel-transport` and `kernel-remote` the way a unit test can't:
//! against an actual socket, actual handshake, and actual savepoint
//! persistence.
//!
//! This is a manual exercise harness, not a kernel. The "kernel object
//! store" and "run queue" on each side are stub loggers: real callers
//! plug in `kernel-remote`'s `KernelObjectStore`/`KernelQueue` traits
//! against their own object graph.

use std::time::Duration;
use std::time::Instant;

use anyhow::Context as _;
use anyhow::Result;
use clap::Parser;
use kernel_remote::KernelObjectStore;
use kernel_remote::KernelQueue;
use kernel_remote::RemoteConfig;
use kernel_remote::RemoteEvent;
use kernel_remote::RemoteHandle;
use kernel_remote::TransportFrameSender;
use kernel_remote::wire::DeliverPayload;
use kernel_store::MemoryStore;
use kernel_transport::Transport;
use kernel_transport::TransportConfig;
use kernel_transport::TransportEvent;
use kernel_transport::TransportEvents;
use log::info;
use remote_comms::KernelIdentity;
use serde_json::Value;
use serde_json::json;
use tokio::time::interval;

/// Send one message between two loopback kernels and print what each
/// side observed.
#[derive(Parser, Debug)]
struct Args {
    /// Text payload delivered from the dialing kernel to the listening one.
    #[arg(long, default_value = "hello from the dialing kernel")]
    message: String,

    /// How long to let the demo run before giving up and exiting.
    #[arg(long, default_value = "5")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let args = Args::parse();

    let listener_identity = KernelIdentity::generate();
    let dialer_identity = KernelIdentity::generate();
    let listener_peer_id = listener_identity.peer_id();
    let dialer_peer_id = dialer_identity.peer_id();

    let listener_config = TransportConfig {
        direct_listen_addresses: vec!["127.0.0.1:0".parse().context("loopback address must parse")?],
        ..TransportConfig::default()
    };
    let (listener_transport, listener_events) = Transport::new(listener_config, listener_peer_id.clone(), Some("kernel-demo-listener".to_owned()))
        .await
        .context("binding the listening kernel's transport")?;
    let listener_addr = listener_transport.get_listen_addresses().await;
    let listener_addr = listener_addr.first().copied().context("listener bound no address")?;
    info!("listening kernel {listener_peer_id} bound at {listener_addr}");

    let (dialer_transport, dialer_events) =
        Transport::new(TransportConfig::default(), dialer_peer_id.clone(), Some("kernel-demo-dialer".to_owned()))
            .await
            .context("starting the dialing kernel's transport")?;
    dialer_transport.register_location_hints(&listener_peer_id, vec![listener_addr.to_string()]).await;

    let listener_task = tokio::spawn(run_side(
        "listener".to_owned(),
        listener_transport.clone(),
        listener_events,
        dialer_peer_id,
        listener_identity,
        None,
    ));
    let dialer_task = tokio::spawn(run_side(
        "dialer".to_owned(),
        dialer_transport.clone(),
        dialer_events,
        listener_peer_id,
        dialer_identity,
        Some(args.message.clone()),
    ));

    tokio::time::sleep(Duration::from_secs(args.timeout_secs)).await;
    listener_transport.stop().await;
    dialer_transport.stop().await;
    listener_task.abort();
    dialer_task.abort();

    info!("demo run complete");
    Ok(())
}

/// A stub `KernelObjectStore`/`KernelQueue`: every export/import round-trips
/// its kref string unchanged and every queue operation just logs.
struct LoggingKernel {
    label: String,
}

impl KernelObjectStore for LoggingKernel {
    fn eref_to_kref(&self, _remote_id: &str, eref: &str) -> Option<String> {
        Some(eref.to_owned())
    }

    fn kref_to_eref(&mut self, _remote_id: &str, kref: &str) -> String {
        kref.to_owned()
    }

    fn export_new(&mut self, _remote_id: &str, kref: &str) -> String {
        kref.to_owned()
    }
}

impl KernelQueue for LoggingKernel {
    fn enqueue_send(&mut self, remote_id: &str, target: &str, methargs: Value, result: Option<String>) {
        info!("[{}] {remote_id} delivered a call on {target:?} with args {methargs} (result eref {result:?})", self.label);
    }

    fn resolve_promises(&mut self, remote_id: &str, resolutions: Vec<(String, bool, Value)>) {
        info!("[{}] {remote_id} resolved {} promise(s)", self.label, resolutions.len());
    }

    fn drop_imports(&mut self, remote_id: &str, erefs: Vec<String>) {
        info!("[{}] {remote_id} dropped imports {erefs:?}", self.label);
    }

    fn retire_exports(&mut self, remote_id: &str, erefs: Vec<String>) {
        info!("[{}] {remote_id} retired exports {erefs:?}", self.label);
    }

    fn retire_imports(&mut self, remote_id: &str, erefs: Vec<String>) {
        info!("[{}] {remote_id} retired imports {erefs:?}", self.label);
    }
}

async fn run_side(
    label: String,
    transport: Transport,
    mut events: TransportEvents,
    remote_id: String,
    identity: KernelIdentity,
    initial_message: Option<String>,
) {
    let mut store = MemoryStore::new();
    let mut kernel = LoggingKernel { label: label.clone() };
    let mut handle = RemoteHandle::load(remote_id.clone(), RemoteConfig::default(), TransportFrameSender::new(transport.clone()), &mut store)
        .unwrap_or_else(|error| panic!("[{label}] failed to load remote handle: {error}"));

    let mut ticker = interval(Duration::from_millis(25));

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break; };
                match event {
                    TransportEvent::Connected { peer_id } => {
                        info!("[{label}] connected to {peer_id}");
                        if let Some(message) = initial_message.clone() {
                            let payload = DeliverPayload::Message {
                                target: "ro+root".to_owned(),
                                methargs: json!({ "text": message }),
                                result: None,
                            };
                            if let Err(error) = handle.deliver_message(&mut store, &payload) {
                                info!("[{label}] failed to deliver initial message: {error}");
                            }
                        }
                    }
                    TransportEvent::Frame { peer_id, frame } => {
                        match handle.handle_remote_message(&mut store, &mut kernel, &mut kernel, &identity, &frame) {
                            Ok(events) => {
                                for event in events {
                                    log_remote_event(&label, &peer_id, &event);
                                }
                            }
                            Err(error) => info!("[{label}] rejecting frame from {peer_id}: {error}"),
                        }
                    }
                    TransportEvent::IncarnationChanged { peer_id } => {
                        info!("[{label}] {peer_id}'s incarnation changed");
                    }
                    TransportEvent::GaveUp { peer_id } => {
                        info!("[{label}] gave up reconnecting to {peer_id}");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                match handle.on_ack_timeout(&mut store, now) {
                    Ok(events) => {
                        for event in events {
                            log_remote_event(&label, &remote_id, &event);
                        }
                        if handle.has_given_up() {
                            info!("[{label}] gave up retransmitting to {remote_id}");
                            break;
                        }
                    }
                    Err(error) => {
                        info!("[{label}] {error}");
                        break;
                    }
                }
                handle.on_delayed_ack_timeout(now);
                for event in handle.on_redemption_timeout(now) {
                    log_remote_event(&label, &remote_id, &event);
                }
            }
        }
    }
}

fn log_remote_event(label: &str, peer_id: &str, event: &RemoteEvent) {
    match event {
        RemoteEvent::RedemptionResolved { reply_key, result } => {
            info!("[{label}] redemption {reply_key} from {peer_id} resolved: {result:?}");
        }
    }
}
