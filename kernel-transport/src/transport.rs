//! `Transport`: owns at most one channel per peer, dials and accepts
//! connections, drives reconnection, and enforces admission control.
//! Grounded on `luanti-protocol`'s `LuantiSocket`/`LuantiSocketRunner`
//! (per-peer multiplexing over one shared listener) and `peer.rs`'s
//! handshake-then-register flow, generalized from UDP datagrams to a
//! length-delimited TCP byte stream per spec §6.

use std::collections::HashMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

use reconnect::PeerId;
use reconnect::ReconnectionManager;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::TransportEvent;
use crate::handshake;
use crate::peer;

struct PeerEntry {
    write_tx: Option<mpsc::UnboundedSender<Bytes>>,
    generation: u64,
    intentionally_closed: bool,
    location_hints: HashSet<String>,
    last_connection_time: Option<Instant>,
    incarnation: Option<String>,
    reconnect_task: Option<tokio::task::JoinHandle<()>>,
}

impl Default for PeerEntry {
    fn default() -> Self {
        Self {
            write_tx: None,
            generation: 0,
            intentionally_closed: false,
            location_hints: HashSet::new(),
            last_connection_time: None,
            incarnation: None,
            reconnect_task: None,
        }
    }
}

struct Inner {
    config: TransportConfig,
    local_peer_id: PeerId,
    local_incarnation_id: Option<String>,
    peers: HashMap<PeerId, PeerEntry>,
    reconnect: ReconnectionManager,
    listen_addresses: Vec<SocketAddr>,
    stopped: bool,
}

/// A cloneable handle to the transport. Internally this is message
/// passing plus one `tokio::sync::Mutex` over peer bookkeeping, not
/// shared-memory mutation of any single remote's state — the invariant
/// spec §5 cares about (no concurrent mutation of one `RemoteHandle`)
/// lives entirely in `kernel-remote`, which this crate never touches.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Mutex<Inner>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

/// The receiving half returned alongside a [`Transport`]; poll with
/// [`TransportEvents::recv`].
pub struct TransportEvents {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportEvents {
    /// Wait for the next event. Returns `None` once every `Transport`
    /// clone has been dropped.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

impl Transport {
    /// Bind the configured listen addresses (if any) and return a handle
    /// plus its event stream. `local_peer_id` and `local_incarnation_id`
    /// are used in the handshake (spec §4.3); a `None` incarnation id
    /// skips the handshake entirely.
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if a configured listen
    /// address can't be bound.
    pub async fn new(
        config: TransportConfig,
        local_peer_id: PeerId,
        local_incarnation_id: Option<String>,
    ) -> Result<(Self, TransportEvents), TransportError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut listen_addresses = Vec::new();
        let mut listeners = Vec::new();
        for addr in &config.direct_listen_addresses {
            let listener = TcpListener::bind(addr).await?;
            listen_addresses.push(listener.local_addr()?);
            listeners.push(listener);
        }

        let inner = Arc::new(Mutex::new(Inner {
            config,
            local_peer_id,
            local_incarnation_id,
            peers: HashMap::new(),
            reconnect: ReconnectionManager::default(),
            listen_addresses,
            stopped: false,
        }));

        let transport = Self { inner, events_tx };
        for listener in listeners {
            tokio::spawn(accept_loop(transport.clone(), listener));
        }
        tokio::spawn(stale_peer_sweep(transport.clone()));
        Ok((transport, TransportEvents { rx: events_rx }))
    }

    /// `sendRemoteMessage` (spec §4.2): best-effort, non-blocking, does
    /// not retry at this layer.
    ///
    /// # Errors
    /// Returns [`TransportError::IntentionalClose`] if the peer was
    /// closed locally, [`TransportError::MessageTooLarge`] or
    /// [`TransportError::ConnectionLimitReached`] for admission-control
    /// failures, or [`TransportError::NoChannel`] if no channel is
    /// currently open (a dial is started in the background).
    pub async fn send_remote_message(&self, peer_id: &PeerId, frame: Bytes) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if frame.len() > inner.config.max_message_size_bytes {
            return Err(TransportError::MessageTooLarge {
                size: frame.len(),
                limit: inner.config.max_message_size_bytes,
            });
        }
        let entry = inner.peers.entry(peer_id.clone()).or_default();
        if entry.intentionally_closed {
            return Err(TransportError::IntentionalClose);
        }
        if let Some(write_tx) = entry.write_tx.clone() {
            if write_tx.send(frame).is_ok() {
                return Ok(());
            }
            entry.write_tx = None;
        }
        let should_start = !inner.reconnect.is_reconnecting(peer_id);
        if should_start {
            self.start_reconnect_loop(&mut inner, peer_id.clone());
        }
        Err(TransportError::NoChannel(peer_id.clone()))
    }

    /// `closeConnection` (spec §4.2).
    pub async fn close_connection(&self, peer_id: &PeerId) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.peers.get_mut(peer_id) {
            entry.intentionally_closed = true;
            entry.write_tx = None;
            if let Some(task) = entry.reconnect_task.take() {
                task.abort();
            }
        }
        inner.reconnect.stop_reconnection(peer_id);
    }

    /// `reconnectPeer` (spec §4.2): clears intentional-close and
    /// permanent-failure, then triggers reconnection.
    pub async fn reconnect_peer(&self, peer_id: &PeerId, hints: Option<Vec<String>>) {
        let mut inner = self.inner.lock().await;
        inner.reconnect.clear_permanent_failure(peer_id);
        let entry = inner.peers.entry(peer_id.clone()).or_default();
        entry.intentionally_closed = false;
        if let Some(hints) = hints {
            entry.location_hints.extend(hints);
        }
        self.start_reconnect_loop(&mut inner, peer_id.clone());
    }

    /// `registerLocationHints` (spec §4.1.1 step 1 / §4.2): merge hints,
    /// deduplicated.
    pub async fn register_location_hints(&self, peer_id: &PeerId, hints: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.peers.entry(peer_id.clone()).or_default().location_hints.extend(hints);
    }

    /// `getListenAddresses`.
    pub async fn get_listen_addresses(&self) -> Vec<SocketAddr> {
        self.inner.lock().await.listen_addresses.clone()
    }

    /// `stop()`: idempotent. Aborts reconnection loops and drops every
    /// channel.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        for entry in inner.peers.values_mut() {
            entry.write_tx = None;
            if let Some(task) = entry.reconnect_task.take() {
                task.abort();
            }
        }
    }

    fn start_reconnect_loop(&self, inner: &mut Inner, peer_id: PeerId) {
        if inner.stopped {
            return;
        }
        if !inner.reconnect.start_reconnection(&peer_id) {
            return;
        }
        let transport = self.clone();
        let loop_peer_id = peer_id.clone();
        let task = tokio::spawn(async move { transport.reconnect_loop(loop_peer_id).await });
        inner.peers.entry(peer_id).or_default().reconnect_task = Some(task);
    }

    /// The reconnection loop pseudocode from spec §4.2, one instance per
    /// peer for as long as that peer is reconnecting.
    async fn reconnect_loop(&self, peer_id: PeerId) {
        loop {
            let (stopped, intentionally_closed) = {
                let inner = self.inner.lock().await;
                let closed = inner.peers.get(&peer_id).is_some_and(|entry| entry.intentionally_closed);
                (inner.stopped, closed)
            };
            if stopped || intentionally_closed {
                self.inner.lock().await.reconnect.stop_reconnection(&peer_id);
                return;
            }

            let should_retry = {
                let inner = self.inner.lock().await;
                inner.reconnect.should_retry(&peer_id, inner.config.max_retry_attempts)
            };
            if !should_retry {
                self.give_up(&peer_id).await;
                return;
            }

            let delay = self.inner.lock().await.reconnect.calculate_backoff(&peer_id);
            tokio::time::sleep(delay).await;

            let (stopped, intentionally_closed) = {
                let inner = self.inner.lock().await;
                let closed = inner.peers.get(&peer_id).is_some_and(|entry| entry.intentionally_closed);
                (inner.stopped, closed)
            };
            if stopped || intentionally_closed {
                self.inner.lock().await.reconnect.stop_reconnection(&peer_id);
                return;
            }

            self.inner.lock().await.reconnect.increment_attempt(&peer_id);

            let hints = {
                let inner = self.inner.lock().await;
                inner
                    .peers
                    .get(&peer_id)
                    .map(|entry| entry.location_hints.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default()
            };

            match self.dial(&hints).await {
                Ok(stream) => {
                    if let Err(error) = self.complete_connection(&peer_id, stream).await {
                        log::warn!("{peer_id}:: connection attempt failed during setup: {error}");
                        let code = classify_io_error_message(&error);
                        self.inner.lock().await.reconnect.record_error(&peer_id, code);
                        if self.inner.lock().await.reconnect.is_permanently_failed(&peer_id) {
                            self.give_up(&peer_id).await;
                            return;
                        }
                        continue;
                    }
                    return;
                }
                Err(error) => {
                    log::warn!("{peer_id}:: dial failed: {error}");
                    let code = classify_io_error_message(&error);
                    self.inner.lock().await.reconnect.record_error(&peer_id, code);
                    if self.inner.lock().await.reconnect.is_permanently_failed(&peer_id) {
                        self.give_up(&peer_id).await;
                        return;
                    }
                }
            }
        }
    }

    async fn dial(&self, hints: &[String]) -> Result<TcpStream, TransportError> {
        let mut last_error = None;
        for hint in hints {
            match hint.parse::<SocketAddr>() {
                Ok(addr) => match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(error) => last_error = Some(error),
                },
                Err(_parse_error) => continue,
            }
        }
        Err(TransportError::Connection(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no usable location hints")
        })))
    }

    /// Admission check, handshake, and registration shared by the
    /// outbound dial path and the inbound accept path.
    async fn complete_connection(&self, peer_id: &PeerId, stream: TcpStream) -> Result<(), TransportError> {
        {
            let inner = self.inner.lock().await;
            let active = inner.peers.values().filter(|entry| entry.write_tx.is_some()).count();
            if active >= inner.config.max_concurrent_connections {
                return Err(TransportError::ConnectionLimitReached);
            }
        }

        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let local_peer_id = self.inner.lock().await.local_peer_id.clone();
        handshake::write_identity(&mut framed, &local_peer_id).await?;
        let local_incarnation_id = self.inner.lock().await.local_incarnation_id.clone();
        let remote_incarnation = match &local_incarnation_id {
            Some(local) => Some(handshake::initiate(&mut framed, local).await?),
            None => None,
        };

        let mut inner = self.inner.lock().await;
        let active = inner.peers.values().filter(|entry| entry.write_tx.is_some()).count();
        if active >= inner.config.max_concurrent_connections {
            return Err(TransportError::ConnectionLimitReached);
        }

        let generation = {
            let entry = inner.peers.entry(peer_id.clone()).or_default();
            entry.generation += 1;
            entry.generation
        };
        let incarnation_changed = match (&remote_incarnation, inner.peers.get(peer_id).and_then(|entry| entry.incarnation.clone())) {
            (Some(new_inc), Some(old_inc)) => *new_inc != old_inc,
            _ => false,
        };
        if let Some(entry) = inner.peers.get_mut(peer_id) {
            entry.incarnation = remote_incarnation.clone().or_else(|| entry.incarnation.clone());
            entry.last_connection_time = Some(Instant::now());
        }
        inner.reconnect.reset_backoff(peer_id);
        inner.reconnect.stop_reconnection(peer_id);
        drop(inner);

        let write_tx = peer::spawn(self.clone(), peer_id.clone(), generation, framed);
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.peers.get_mut(peer_id) {
            entry.write_tx = Some(write_tx);
        }
        drop(inner);

        let _ = self.events_tx.send(TransportEvent::Connected { peer_id: peer_id.clone() });
        if incarnation_changed {
            let _ = self.events_tx.send(TransportEvent::IncarnationChanged { peer_id: peer_id.clone() });
        }
        Ok(())
    }

    async fn give_up(&self, peer_id: &PeerId) {
        log::warn!("{peer_id}:: gave up reconnecting");
        let mut inner = self.inner.lock().await;
        inner.reconnect.stop_reconnection(peer_id);
        if let Some(entry) = inner.peers.get_mut(peer_id) {
            entry.write_tx = None;
            entry.reconnect_task = None;
        }
        drop(inner);
        let _ = self.events_tx.send(TransportEvent::GaveUp { peer_id: peer_id.clone() });
    }

    pub(crate) fn deliver_frame(&self, peer_id: PeerId, frame: Bytes) {
        let _ = self.events_tx.send(TransportEvent::Frame { peer_id, frame });
    }

    pub(crate) async fn report_connection_lost(&self, peer_id: &PeerId, generation: u64, error: TransportError) {
        log::warn!("{peer_id}:: connection lost: {error}");
        self.handle_channel_gone(peer_id, generation).await;
    }

    pub(crate) async fn report_remote_closed(&self, peer_id: &PeerId, generation: u64) {
        self.handle_channel_gone(peer_id, generation).await;
    }

    async fn handle_channel_gone(&self, peer_id: &PeerId, generation: u64) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.peers.get_mut(peer_id) else {
            return;
        };
        if entry.generation != generation {
            // A newer channel already replaced this one; ignore the stale report.
            return;
        }
        entry.write_tx = None;
        let intentionally_closed = entry.intentionally_closed;
        let stopped = inner.stopped;
        if intentionally_closed || stopped {
            return;
        }
        if !inner.reconnect.is_reconnecting(peer_id) {
            self.start_reconnect_loop(&mut inner, peer_id.clone());
        }
    }
}

async fn accept_loop(transport: Transport, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                let transport = transport.clone();
                tokio::spawn(async move {
                    if let Err(error) = accept_one(&transport, stream, remote_addr).await {
                        log::warn!("inbound connection from {remote_addr} failed: {error}");
                    }
                });
            }
            Err(error) => {
                log::error!("accept loop failed: {error}");
                return;
            }
        }
    }
}

async fn accept_one(transport: &Transport, stream: TcpStream, remote_addr: SocketAddr) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    let peer_id = handshake::read_identity(&mut framed).await?;
    let local_incarnation_id = transport.inner.lock().await.local_incarnation_id.clone();
    if let Some(local) = &local_incarnation_id {
        let remote_incarnation = handshake::respond(&mut framed, local).await?;
        let mut inner = transport.inner.lock().await;
        let active = inner.peers.values().filter(|entry| entry.write_tx.is_some()).count();
        if active >= inner.config.max_concurrent_connections {
            return Err(TransportError::ConnectionLimitReached);
        }
        let generation = {
            let entry = inner.peers.entry(peer_id.clone()).or_default();
            entry.generation += 1;
            entry.generation
        };
        let incarnation_changed = match inner.peers.get(&peer_id).and_then(|entry| entry.incarnation.clone()) {
            Some(old_inc) => old_inc != remote_incarnation,
            None => false,
        };
        if let Some(entry) = inner.peers.get_mut(&peer_id) {
            entry.incarnation = Some(remote_incarnation);
            entry.last_connection_time = Some(Instant::now());
        }
        inner.reconnect.reset_backoff(&peer_id);
        drop(inner);
        let write_tx = peer::spawn(transport.clone(), peer_id.clone(), generation, framed);
        let mut inner = transport.inner.lock().await;
        if let Some(entry) = inner.peers.get_mut(&peer_id) {
            entry.write_tx = Some(write_tx);
        }
        drop(inner);
        let _ = transport.events_tx.send(TransportEvent::Connected { peer_id: peer_id.clone() });
        if incarnation_changed {
            let _ = transport.events_tx.send(TransportEvent::IncarnationChanged { peer_id });
        }
        let _ = remote_addr;
        Ok(())
    } else {
        let mut inner = transport.inner.lock().await;
        let generation = {
            let entry = inner.peers.entry(peer_id.clone()).or_default();
            entry.generation += 1;
            entry.generation
        };
        if let Some(entry) = inner.peers.get_mut(&peer_id) {
            entry.last_connection_time = Some(Instant::now());
        }
        drop(inner);
        let write_tx = peer::spawn(transport.clone(), peer_id.clone(), generation, framed);
        let mut inner = transport.inner.lock().await;
        if let Some(entry) = inner.peers.get_mut(&peer_id) {
            entry.write_tx = Some(write_tx);
        }
        drop(inner);
        let _ = transport.events_tx.send(TransportEvent::Connected { peer_id });
        Ok(())
    }
}

async fn stale_peer_sweep(transport: Transport) {
    loop {
        let interval = {
            let inner = transport.inner.lock().await;
            if inner.stopped {
                return;
            }
            inner.config.cleanup_interval
        };
        tokio::time::sleep(interval).await;
        let mut inner = transport.inner.lock().await;
        if inner.stopped {
            return;
        }
        let stale_peer_timeout = inner.config.stale_peer_timeout;
        let now = Instant::now();
        inner.peers.retain(|_peer_id, entry| {
            let has_channel = entry.write_tx.is_some();
            let reconnecting = entry.reconnect_task.is_some();
            let stale = entry
                .last_connection_time
                .is_some_and(|last| now.duration_since(last) > stale_peer_timeout);
            !(!has_channel && !reconnecting && stale)
        });
    }
}

fn classify_io_error_message(error: &TransportError) -> &'static str {
    match error {
        TransportError::Connection(io_error) => match io_error.kind() {
            std::io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
            std::io::ErrorKind::HostUnreachable => "EHOSTUNREACH",
            std::io::ErrorKind::NetworkUnreachable => "ENETUNREACH",
            std::io::ErrorKind::NotFound => "ENOTFOUND",
            std::io::ErrorKind::TimedOut => "ETIMEDOUT",
            std::io::ErrorKind::ConnectionReset => "ECONNRESET",
            _ => "EOTHER",
        },
        TransportError::Handshake(_) => "EHANDSHAKE",
        TransportError::WriteTimeout => "ETIMEDOUT",
        TransportError::ConnectionLimitReached => "ECAPACITY",
        _ => "EOTHER",
    }
}

