// session.rs — role-fixed datagram session over an unreliable transport
//
// One peer is the host, everyone else is a client; the role never changes
// after start. Send/receive failures are non-fatal: they bump per-peer
// counters, and a peer that stays silent past the timeout or keeps failing
// sends is disconnected with an event, never a panic.

use crate::clock::now_ms;
use crate::inbound::{Datagram, InboundQueue, InboundSender};
use crate::netbuf::MAX_PACKET_LEN;
use crate::wire::{Packet, PeerId, HOST_PEER_ID};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

// ============================================================
// Transport
// ============================================================

/// Non-blocking unordered/unreliable datagram link. Delivery, ordering and
/// uniqueness are all best-effort; the protocol above tolerates the rest.
pub trait Transport: Send {
    /// Returns false on a transient failure (packet considered lost).
    fn send(&mut self, to: SocketAddr, data: &[u8]) -> bool;
    /// Non-blocking; None when nothing is pending.
    fn recv(&mut self) -> Option<(SocketAddr, Vec<u8>)>;
    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpTransport {
    socket: UdpSocket,
    local: SocketAddr,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> Result<Self, SessionError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local = socket.local_addr()?;
        Ok(Self { socket, local })
    }

    /// Second handle onto the same socket, for a receive thread.
    pub fn try_clone(&self) -> Result<Self, SessionError> {
        let socket = self.socket.try_clone()?;
        Ok(Self {
            socket,
            local: self.local,
        })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, to: SocketAddr, data: &[u8]) -> bool {
        match self.socket.send_to(data, to) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                log::debug!("udp send to {} failed: {}", to, e);
                false
            }
        }
    }

    fn recv(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => Some((from, buf[..len].to_vec())),
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                log::debug!("udp recv failed: {}", e);
                None
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

// ============================================================
// Loopback transport (tests and local play)
// ============================================================

type LoopbackQueue = Arc<parking_lot::Mutex<VecDeque<(SocketAddr, Vec<u8>)>>>;

/// In-memory datagram pair with configurable loss and reordering, driven by
/// a seeded RNG so failure scenarios replay exactly.
pub struct LoopbackTransport {
    local: SocketAddr,
    inbox: LoopbackQueue,
    peer_inbox: LoopbackQueue,
    pub drop_chance: f32,
    pub reorder_chance: f32,
    rng: rand::rngs::StdRng,
}

impl LoopbackTransport {
    pub fn pair(seed: u64) -> (Self, Self) {
        use rand::SeedableRng;
        let a_addr = SocketAddr::from(([127, 0, 0, 1], 1));
        let b_addr = SocketAddr::from(([127, 0, 0, 1], 2));
        let a_inbox: LoopbackQueue = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        let b_inbox: LoopbackQueue = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        (
            Self {
                local: a_addr,
                inbox: Arc::clone(&a_inbox),
                peer_inbox: Arc::clone(&b_inbox),
                drop_chance: 0.0,
                reorder_chance: 0.0,
                rng: rand::rngs::StdRng::seed_from_u64(seed),
            },
            Self {
                local: b_addr,
                inbox: b_inbox,
                peer_inbox: a_inbox,
                drop_chance: 0.0,
                reorder_chance: 0.0,
                rng: rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(1)),
            },
        )
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, _to: SocketAddr, data: &[u8]) -> bool {
        use rand::Rng;
        if self.drop_chance > 0.0 && self.rng.gen::<f32>() < self.drop_chance {
            return true; // silently lost, as UDP would be
        }
        let mut q = self.peer_inbox.lock();
        q.push_back((self.local, data.to_vec()));
        if self.reorder_chance > 0.0 && q.len() >= 2 && self.rng.gen::<f32>() < self.reorder_chance
        {
            let len = q.len();
            q.swap(len - 1, len - 2);
        }
        true
    }

    fn recv(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.inbox.lock().pop_front()
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

// ============================================================
// Receive thread
// ============================================================

/// Moves a transport handle onto a dedicated receive thread feeding an
/// inbound queue. The simulation thread keeps its own handle for sends.
pub fn spawn_recv_thread(
    mut transport: Box<dyn Transport>,
    tx: InboundSender,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("net-recv".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                match transport.recv() {
                    Some((from, data)) => {
                        let dg = Datagram {
                            from,
                            data,
                            arrived: now_ms(),
                        };
                        if !tx.try_send(dg) {
                            log::debug!("inbound queue full, datagram dropped");
                        }
                    }
                    None => std::thread::sleep(std::time::Duration::from_millis(1)),
                }
            }
        })
        .expect("failed to spawn net-recv thread")
}

// ============================================================
// Peers
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Rolling per-second byte counters plus a ping estimate.
#[derive(Debug, Clone, Default)]
pub struct PeerStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_rate: u32,
    pub recv_rate: u32,
    pub ping_ms: i32,
    window_start: i64,
    window_sent: u32,
    window_received: u32,
}

impl PeerStats {
    pub fn note_sent(&mut self, bytes: usize, now: i64) {
        self.roll(now);
        self.bytes_sent += bytes as u64;
        self.window_sent += bytes as u32;
    }

    pub fn note_received(&mut self, bytes: usize, now: i64) {
        self.roll(now);
        self.bytes_received += bytes as u64;
        self.window_received += bytes as u32;
    }

    fn roll(&mut self, now: i64) {
        if now - self.window_start >= 1000 {
            self.send_rate = self.window_sent;
            self.recv_rate = self.window_received;
            self.window_sent = 0;
            self.window_received = 0;
            self.window_start = now;
        }
    }
}

#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub name: String,
    pub last_received: i64,
    pub send_failures: u32,
    pub stats: PeerStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerConnected { id: PeerId, name: String },
    PeerDisconnected { id: PeerId, reason: String },
}

// ============================================================
// Session
// ============================================================

pub struct Session {
    role: Role,
    transport: Box<dyn Transport>,
    /// Fed by the optional receive thread; drained before the transport.
    inbound: InboundQueue,
    io_thread: Option<(JoinHandle<()>, Arc<AtomicBool>)>,
    peers: Vec<Peer>,
    events: Vec<SessionEvent>,
    next_peer_id: PeerId,
    pub timeout_ms: i64,
    pub max_send_failures: u32,
}

impl Session {
    pub fn new(role: Role, transport: Box<dyn Transport>) -> Self {
        Self {
            role,
            transport,
            inbound: InboundQueue::default(),
            io_thread: None,
            peers: Vec::new(),
            events: Vec::new(),
            next_peer_id: HOST_PEER_ID + 1,
            timeout_ms: 10_000,
            max_send_failures: 20,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Start a dedicated receive thread over a second transport handle
    /// (e.g. UdpTransport::try_clone). Sends stay on the calling thread.
    pub fn start_recv_thread(&mut self, recv_transport: Box<dyn Transport>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_recv_thread(recv_transport, self.inbound.sender(), Arc::clone(&shutdown));
        self.io_thread = Some((handle, shutdown));
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.id == id)
    }

    pub fn peer_by_addr(&self, addr: SocketAddr) -> Option<&Peer> {
        self.peers.iter().find(|p| p.addr == addr)
    }

    /// Register a connected peer (host side, after handshake). The host
    /// assigns ids; clients register the host under HOST_PEER_ID.
    pub fn add_peer(&mut self, addr: SocketAddr, name: &str, now: i64) -> PeerId {
        let id = if self.role == Role::Client {
            HOST_PEER_ID
        } else {
            let id = self.next_peer_id;
            self.next_peer_id += 1;
            id
        };
        self.peers.push(Peer {
            id,
            addr,
            name: name.to_string(),
            last_received: now,
            send_failures: 0,
            stats: PeerStats::default(),
        });
        self.events.push(SessionEvent::PeerConnected {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn drop_peer(&mut self, id: PeerId, reason: &str) {
        if let Some(pos) = self.peers.iter().position(|p| p.id == id) {
            let peer = self.peers.remove(pos);
            log::info!("peer {} ({}) disconnected: {}", peer.id, peer.name, reason);
            self.events.push(SessionEvent::PeerDisconnected {
                id,
                reason: reason.to_string(),
            });
        }
    }

    /// Raw send to an address not yet in the peer table (handshake traffic).
    pub fn send_addr(&mut self, addr: SocketAddr, packet: &Packet) {
        let bytes = packet.encode();
        self.transport.send(addr, &bytes);
    }

    pub fn send_to(&mut self, id: PeerId, packet: &Packet, now: i64) {
        let bytes = packet.encode();
        let Some(peer) = self.peers.iter_mut().find(|p| p.id == id) else {
            log::warn!("send_to: unknown peer {}", id);
            return;
        };
        if self.transport.send(peer.addr, &bytes) {
            peer.send_failures = 0;
            peer.stats.note_sent(bytes.len(), now);
        } else {
            peer.send_failures += 1;
        }
        let failures = peer.send_failures;
        if failures > self.max_send_failures {
            self.drop_peer(id, "too many send failures");
        }
    }

    pub fn broadcast(&mut self, packet: &Packet, now: i64) {
        let ids: Vec<PeerId> = self.peers.iter().map(|p| p.id).collect();
        for id in ids {
            self.send_to(id, packet, now);
        }
    }

    /// Drain all pending datagrams, decode them, and update peer stats.
    /// Corrupt packets are logged and skipped, never fatal.
    pub fn poll(&mut self, now: i64) -> Vec<(SocketAddr, Packet)> {
        let mut raw: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        while let Some(dg) = self.inbound.try_recv() {
            raw.push((dg.from, dg.data));
        }
        while let Some((from, data)) = self.transport.recv() {
            raw.push((from, data));
        }

        let mut out = Vec::with_capacity(raw.len());
        for (from, data) in raw {
            let packet = match Packet::decode(&data) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("dropping bad packet from {}: {}", from, e);
                    continue;
                }
            };
            if let Some(peer) = self.peers.iter_mut().find(|p| p.addr == from) {
                peer.last_received = now;
                peer.stats.note_received(data.len(), now);
            }
            out.push((from, packet));
        }
        out
    }

    /// Timeout sweep; call once per tick.
    pub fn check_timeouts(&mut self, now: i64) {
        let droppoint = now - self.timeout_ms;
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|p| p.last_received < droppoint)
            .map(|p| p.id)
            .collect();
        for id in stale {
            self.drop_peer(id, "timed out");
        }
    }

    /// Connection/disconnection events since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some((handle, shutdown)) = self.io_thread.take() {
            shutdown.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}
