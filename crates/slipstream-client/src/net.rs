// net.rs — client connection to the host
//
// Handshake: Hello -> Challenge -> Connect -> Welcome, retried until the
// host answers or rejects. Once connected, every pump uploads the current
// input as a move intent and writes estimated poses into the subsystems.
// All remote entities, the local car included, are physics puppets here;
// the host simulates, the client follows.

use crate::estimate::Estimator;
use slipstream_common::entity::EntityId;
use slipstream_common::netbuf::{NetBuf, NetReader, MAX_PACKET_LEN};
use slipstream_common::session::{Session, SessionEvent};
use slipstream_common::wire::{
    decode_snapshot_batch, Connect, MoveIntent, Packet, PacketKind, PeerId, RaceEvent, Welcome,
    HOST_PEER_ID, PROTOCOL_VERSION, UNASSIGNED_PEER_ID,
};
use slipstream_engine::command::{AudioCmd, GraphicsCmd, PhysicsCmd, Timed};
use slipstream_engine::game_state::GlobalState;
use slipstream_engine::run_loop::NetRouter;
use slipstream_engine::subsystem::SubsystemHandles;
use std::net::SocketAddr;

const HELLO_RETRY_MS: i64 = 1000;
const CAR_MODEL: &str = "car";
/// Every broadcast covers every replicated entity, so a puppet this far
/// behind the newest snapshot is gone. Backstop for a lost Despawn.
const PUPPET_STALE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Disconnected,
    AwaitingChallenge,
    AwaitingWelcome,
    Connected,
}

/// Things the UI layer wants to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    Connected { peer_id: PeerId, car: EntityId },
    Rejected { reason: String },
    HostLost,
    Chat { from: PeerId, text: String },
    Race(RaceEvent),
}

pub struct ClientSync {
    pub session: Session,
    host_addr: SocketAddr,
    name: String,
    phase: ClientPhase,
    peer_id: PeerId,
    car: Option<EntityId>,
    pub estimator: Estimator,
    /// Entities we have already created puppet bodies and visuals for.
    known: std::collections::HashSet<EntityId>,
    last_sent: Option<i64>,
    pending_connect: Option<Connect>,
    /// Newest snapshot packet timestamp seen, host clock.
    last_snapshot: i64,
    notices: Vec<ClientNotice>,
}

fn payload(f: impl FnOnce(&mut NetBuf)) -> Vec<u8> {
    let mut buf = NetBuf::new(MAX_PACKET_LEN);
    f(&mut buf);
    buf.into_vec()
}

impl ClientSync {
    pub fn new(session: Session, host_addr: SocketAddr, name: &str) -> Self {
        Self {
            session,
            host_addr,
            name: name.to_string(),
            phase: ClientPhase::Disconnected,
            peer_id: UNASSIGNED_PEER_ID,
            car: None,
            estimator: Estimator::new(),
            known: std::collections::HashSet::new(),
            last_sent: None,
            pending_connect: None,
            last_snapshot: 0,
            notices: Vec::new(),
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn car(&self) -> Option<EntityId> {
        self.car
    }

    pub fn take_notices(&mut self) -> Vec<ClientNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn send_chat(&mut self, text: &str, now: i64) {
        let packet = Packet::new(
            PacketKind::Chat,
            self.peer_id,
            now,
            text.as_bytes().to_vec(),
        );
        self.session.send_addr(self.host_addr, &packet);
    }

    /// Orderly goodbye; the host despawns our car on receipt, and the
    /// timeout sweep covers the case where this packet is lost.
    pub fn disconnect(&mut self, now: i64) {
        let packet = Packet::new(PacketKind::Disconnect, self.peer_id, now, Vec::new());
        self.session.send_addr(self.host_addr, &packet);
        self.phase = ClientPhase::Disconnected;
    }

    // ============================================================
    // Handshake
    // ============================================================

    fn pump_handshake(&mut self, now: i64) {
        let due = self.last_sent.map_or(true, |t| now - t >= HELLO_RETRY_MS);
        if !due {
            return;
        }
        match self.phase {
            ClientPhase::Disconnected | ClientPhase::AwaitingChallenge => {
                self.last_sent = Some(now);
                self.phase = ClientPhase::AwaitingChallenge;
                let hello = Packet::new(PacketKind::Hello, UNASSIGNED_PEER_ID, now, Vec::new());
                self.session.send_addr(self.host_addr, &hello);
            }
            ClientPhase::AwaitingWelcome => {
                // Either our connect or the welcome was lost; say it again.
                match self.pending_connect.clone() {
                    Some(connect) => {
                        self.last_sent = Some(now);
                        self.send_connect(&connect, now);
                    }
                    None => self.phase = ClientPhase::Disconnected,
                }
            }
            ClientPhase::Connected => {}
        }
    }

    fn send_connect(&mut self, connect: &Connect, now: i64) {
        let packet = Packet::new(
            PacketKind::Connect,
            UNASSIGNED_PEER_ID,
            now,
            payload(|b| connect.encode(b)),
        );
        self.session.send_addr(self.host_addr, &packet);
    }

    fn handle_challenge(&mut self, packet: &Packet, now: i64) {
        let Ok(nonce) = NetReader::new(&packet.payload).read_u32() else {
            return;
        };
        let connect = Connect {
            nonce,
            protocol: PROTOCOL_VERSION,
            name: self.name.clone(),
        };
        self.send_connect(&connect, now);
        self.pending_connect = Some(connect);
        self.last_sent = Some(now);
        self.phase = ClientPhase::AwaitingWelcome;
    }

    fn handle_welcome(
        &mut self,
        globals: &mut GlobalState,
        handles: &SubsystemHandles,
        packet: &Packet,
        now: i64,
    ) {
        let welcome = match Welcome::decode(&mut NetReader::new(&packet.payload)) {
            Ok(w) => w,
            Err(e) => {
                log::warn!("bad welcome: {}", e);
                return;
            }
        };
        self.phase = ClientPhase::Connected;
        self.pending_connect = None;
        self.peer_id = welcome.peer_id;
        self.car = Some(welcome.entity);
        globals.local_entity = Some(welcome.entity);
        self.session.add_peer(self.host_addr, "host", now);
        self.ensure_entity(handles, welcome.entity);
        log::info!(
            "connected as peer {} driving {:?}",
            welcome.peer_id,
            welcome.entity
        );
        self.notices.push(ClientNotice::Connected {
            peer_id: welcome.peer_id,
            car: welcome.entity,
        });
    }

    // ============================================================
    // Connected traffic
    // ============================================================

    /// First sight of an entity: create its puppet body and visual.
    fn ensure_entity(&mut self, handles: &SubsystemHandles, entity: EntityId) {
        if !self.known.insert(entity) {
            return;
        }
        handles.physics.enqueue(Timed::now(PhysicsCmd::AddBody {
            entity,
            position: [0.0; 3],
            velocity: [0.0; 3],
            rotation: [0.0; 3],
            simulated: false,
        }));
        handles.graphics.enqueue(Timed::now(GraphicsCmd::AddVisual {
            entity,
            model: CAR_MODEL.to_string(),
        }));
    }

    /// Tear a puppet back down once the host says its entity is gone.
    fn remove_entity(&mut self, handles: &SubsystemHandles, entity: EntityId) {
        if !self.known.remove(&entity) {
            return;
        }
        self.estimator.forget(entity);
        handles
            .physics
            .enqueue(Timed::now(PhysicsCmd::RemoveBody { entity }));
        handles
            .graphics
            .enqueue(Timed::now(GraphicsCmd::RemoveVisual { entity }));
    }

    fn handle_snapshot(
        &mut self,
        globals: &GlobalState,
        handles: &SubsystemHandles,
        packet: &Packet,
        now: i64,
    ) {
        let settings = globals.config.sync_settings();
        // Baseline is the newest accepted snapshot; lost deltas decode
        // against a slightly wrong baseline until the next keyframe heals it.
        let snaps = {
            let estimator = &self.estimator;
            match decode_snapshot_batch(&packet.payload, packet.timestamp, |id| {
                estimator.newest(id).cloned()
            }) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("bad snapshot batch: {}", e);
                    return;
                }
            }
        };
        self.last_snapshot = self.last_snapshot.max(packet.timestamp);
        for snap in snaps {
            let entity = snap.id;
            self.ensure_entity(handles, entity);
            self.estimator.ingest(snap, now, &settings);
        }
        self.prune_stale_puppets(handles);
    }

    /// Drop puppets whose snapshots stopped coming long enough ago that the
    /// host must have despawned them, measured on the host's clock.
    fn prune_stale_puppets(&mut self, handles: &SubsystemHandles) {
        let horizon = self.last_snapshot - PUPPET_STALE_MS;
        let gone: Vec<EntityId> = self
            .known
            .iter()
            .copied()
            .filter(|id| {
                self.estimator
                    .newest(*id)
                    .map_or(false, |s| s.sent < horizon)
            })
            .collect();
        for entity in gone {
            self.remove_entity(handles, entity);
        }
    }

    fn handle_ping(&mut self, packet: &Packet, now: i64) {
        let pong = Packet::new(
            PacketKind::Pong,
            self.peer_id,
            now,
            payload(|b| b.write_i64(packet.timestamp)),
        );
        self.session.send_addr(self.host_addr, &pong);
    }

    fn upload_move_intent(&mut self, globals: &GlobalState, now: i64) {
        let Some(car) = self.car else {
            return;
        };
        let intent = MoveIntent {
            entity: car,
            throttle: globals.current_input.throttle,
            steer: globals.current_input.steer,
            buttons: globals.current_input.buttons,
        };
        let packet = Packet::new(
            PacketKind::MoveIntent,
            self.peer_id,
            now,
            payload(|b| intent.encode(b)),
        );
        self.session.send_to(HOST_PEER_ID, &packet, now);
    }

    /// Drive every tracked puppet to its estimated pose.
    fn apply_estimates(&mut self, globals: &GlobalState, handles: &SubsystemHandles, now: i64) {
        let settings = globals.config.sync_settings();
        let ids: Vec<EntityId> = self.estimator.entities().collect();
        for entity in ids {
            let Some(pose) = self.estimator.pose(entity, now, &settings) else {
                continue;
            };
            handles.physics.enqueue(Timed::now(PhysicsCmd::SetPose {
                entity,
                position: pose.position,
                velocity: pose.velocity,
                rotation: pose.rotation,
            }));
            handles.graphics.enqueue(Timed::now(GraphicsCmd::SetTransform {
                entity,
                position: pose.position,
                rotation: pose.rotation,
            }));
            if Some(entity) == self.car {
                handles.audio.enqueue(Timed::now(AudioCmd::SetListener {
                    position: pose.position,
                    rotation: pose.rotation,
                }));
            }
        }
    }

    fn handle_host_lost(&mut self) {
        log::warn!("lost connection to host");
        self.phase = ClientPhase::Disconnected;
        self.peer_id = UNASSIGNED_PEER_ID;
        self.last_sent = None;
        self.pending_connect = None;
        self.last_snapshot = 0;
        self.notices.push(ClientNotice::HostLost);
    }
}

impl NetRouter for ClientSync {
    fn pump(&mut self, globals: &mut GlobalState, handles: &SubsystemHandles, now: i64) {
        self.session.timeout_ms = (globals.config.value("net_timeout") * 1000.0) as i64;
        self.session.max_send_failures = globals.config.value("net_max_send_failures") as u32;

        self.pump_handshake(now);

        for (from, packet) in self.session.poll(now) {
            if from != self.host_addr {
                log::debug!("ignoring packet from stranger {}", from);
                continue;
            }
            match packet.kind {
                PacketKind::Challenge => self.handle_challenge(&packet, now),
                PacketKind::Welcome => self.handle_welcome(globals, handles, &packet, now),
                PacketKind::Reject => {
                    let reason = NetReader::new(&packet.payload)
                        .read_str()
                        .unwrap_or_default();
                    log::warn!("connection rejected: {}", reason);
                    self.phase = ClientPhase::Disconnected;
                    self.pending_connect = None;
                    self.notices.push(ClientNotice::Rejected { reason });
                }
                PacketKind::Snapshot => self.handle_snapshot(globals, handles, &packet, now),
                PacketKind::Despawn => {
                    if let Ok(raw) = NetReader::new(&packet.payload).read_u32() {
                        self.remove_entity(handles, EntityId::from_raw(raw));
                    }
                }
                PacketKind::Ping => self.handle_ping(&packet, now),
                PacketKind::Chat => {
                    let text = String::from_utf8_lossy(&packet.payload).into_owned();
                    self.notices.push(ClientNotice::Chat {
                        from: packet.sender,
                        text,
                    });
                }
                PacketKind::Checkpoint | PacketKind::LapComplete | PacketKind::Ranking => {
                    match RaceEvent::decode(packet.kind, &mut NetReader::new(&packet.payload)) {
                        Ok(event) => self.notices.push(ClientNotice::Race(event)),
                        Err(e) => log::warn!("bad race event: {}", e),
                    }
                }
                PacketKind::Disconnect => self.handle_host_lost(),
                other => log::debug!("client ignoring {:?}", other),
            }
        }

        if self.phase == ClientPhase::Connected {
            self.session.check_timeouts(now);
            for event in self.session.take_events() {
                if matches!(event, SessionEvent::PeerDisconnected { .. }) {
                    self.handle_host_lost();
                }
            }
        }

        if self.phase == ClientPhase::Connected {
            self.upload_move_intent(globals, now);
            self.apply_estimates(globals, handles, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipstream_common::entity::EntityId;
    use slipstream_common::session::{LoopbackTransport, Role, Transport};
    use slipstream_common::wire::{encode_snapshot_batch, EntitySnapshot, HOST_PEER_ID};

    const CLIENT_ADDR: &str = "127.0.0.1:2";

    fn setup() -> (ClientSync, GlobalState, SubsystemHandles, LoopbackTransport) {
        let (host_t, client_t) = LoopbackTransport::pair(5);
        let host_addr = host_t.local_addr();
        let session = Session::new(Role::Client, Box::new(client_t));
        (
            ClientSync::new(session, host_addr, "tester"),
            GlobalState::new(),
            SubsystemHandles::new(),
            host_t,
        )
    }

    fn send(t: &mut LoopbackTransport, packet: &Packet) {
        t.send(CLIENT_ADDR.parse().unwrap(), &packet.encode());
    }

    fn drain(t: &mut LoopbackTransport) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some((_, data)) = t.recv() {
            out.push(Packet::decode(&data).unwrap());
        }
        out
    }

    fn find(packets: &[Packet], kind: PacketKind) -> Option<Packet> {
        packets.iter().find(|p| p.kind == kind).cloned()
    }

    fn car_id() -> EntityId {
        EntityId {
            index: 3,
            generation: 0,
        }
    }

    fn connect(
        client: &mut ClientSync,
        globals: &mut GlobalState,
        handles: &SubsystemHandles,
        host: &mut LoopbackTransport,
    ) {
        client.pump(globals, handles, 0);
        assert!(find(&drain(host), PacketKind::Hello).is_some());

        send(
            host,
            &Packet::new(
                PacketKind::Challenge,
                HOST_PEER_ID,
                10,
                payload(|b| b.write_u32(0xabcd)),
            ),
        );
        client.pump(globals, handles, 20);
        let connect_pkt = find(&drain(host), PacketKind::Connect).unwrap();
        let c = Connect::decode(&mut NetReader::new(&connect_pkt.payload)).unwrap();
        assert_eq!(c.nonce, 0xabcd);
        assert_eq!(c.protocol, PROTOCOL_VERSION);

        let welcome = Welcome {
            peer_id: 1,
            entity: car_id(),
        };
        send(
            host,
            &Packet::new(
                PacketKind::Welcome,
                HOST_PEER_ID,
                30,
                payload(|b| welcome.encode(b)),
            ),
        );
        client.pump(globals, handles, 40);
    }

    #[test]
    fn test_handshake_reaches_connected() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);

        assert_eq!(client.phase(), ClientPhase::Connected);
        assert_eq!(client.peer_id(), 1);
        assert_eq!(client.car(), Some(car_id()));
        assert_eq!(globals.local_entity, Some(car_id()));
        assert!(client.take_notices().iter().any(|n| matches!(
            n,
            ClientNotice::Connected { peer_id: 1, .. }
        )));

        // The local car exists as a puppet.
        let cmds = handles.physics.drain();
        assert!(cmds.iter().any(|c| matches!(
            c.cmd,
            PhysicsCmd::AddBody { entity, simulated: false, .. } if entity == car_id()
        )));
    }

    #[test]
    fn test_hello_retries_until_answered() {
        let (mut client, mut globals, handles, mut host) = setup();
        client.pump(&mut globals, &handles, 0);
        client.pump(&mut globals, &handles, 500);
        client.pump(&mut globals, &handles, 1200);
        let hellos = drain(&mut host)
            .iter()
            .filter(|p| p.kind == PacketKind::Hello)
            .count();
        assert_eq!(hellos, 2);
    }

    #[test]
    fn test_lost_welcome_retries_connect() {
        let (mut client, mut globals, handles, mut host) = setup();
        client.pump(&mut globals, &handles, 0);
        drain(&mut host);
        send(
            &mut host,
            &Packet::new(
                PacketKind::Challenge,
                HOST_PEER_ID,
                10,
                payload(|b| b.write_u32(7)),
            ),
        );
        client.pump(&mut globals, &handles, 20);
        assert!(find(&drain(&mut host), PacketKind::Connect).is_some());
        assert_eq!(client.phase(), ClientPhase::AwaitingWelcome);

        // The welcome never arrives. Within the retry window: silence.
        client.pump(&mut globals, &handles, 500);
        assert!(find(&drain(&mut host), PacketKind::Connect).is_none());

        // Past it: the connect goes out again with the same nonce.
        client.pump(&mut globals, &handles, 1100);
        let retried = find(&drain(&mut host), PacketKind::Connect).unwrap();
        let c = Connect::decode(&mut NetReader::new(&retried.payload)).unwrap();
        assert_eq!(c.nonce, 7);
        assert_eq!(client.phase(), ClientPhase::AwaitingWelcome);
    }

    #[test]
    fn test_reject_surfaces_reason() {
        let (mut client, mut globals, handles, mut host) = setup();
        client.pump(&mut globals, &handles, 0);
        drain(&mut host);
        send(
            &mut host,
            &Packet::new(
                PacketKind::Reject,
                HOST_PEER_ID,
                10,
                payload(|b| b.write_str("protocol version mismatch")),
            ),
        );
        client.pump(&mut globals, &handles, 20);
        assert_eq!(client.phase(), ClientPhase::Disconnected);
        assert!(client.take_notices().contains(&ClientNotice::Rejected {
            reason: "protocol version mismatch".to_string()
        }));
    }

    #[test]
    fn test_snapshot_feeds_estimator_and_puppets() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);
        handles.physics.drain();
        handles.graphics.drain();

        let rival = EntityId {
            index: 9,
            generation: 0,
        };
        let snaps = vec![EntitySnapshot {
            id: rival,
            position: [10.0, 0.0, 0.0],
            velocity: [20.0, 0.0, 0.0],
            rotation: [0.0; 3],
            custom: String::new(),
            sent: 100,
        }];
        let body = payload(|b| encode_snapshot_batch(&snaps, |_| None, b));
        send(
            &mut host,
            &Packet::new(PacketKind::Snapshot, HOST_PEER_ID, 100, body),
        );
        client.pump(&mut globals, &handles, 200);

        assert!(client.estimator.is_tracking(rival));
        let cmds = handles.physics.drain();
        // Extrapolated 100ms forward: 10 + 20 * 0.1 = 12.
        assert!(cmds.iter().any(|c| matches!(
            c.cmd,
            PhysicsCmd::SetPose { entity, position, .. }
                if entity == rival && (position[0] - 12.0).abs() < 1e-3
        )));
        assert!(handles
            .graphics
            .drain()
            .iter()
            .any(|c| matches!(c.cmd, GraphicsCmd::SetTransform { entity, .. } if entity == rival)));
    }

    fn snapshot_body(snaps: &[EntitySnapshot]) -> Vec<u8> {
        payload(|b| encode_snapshot_batch(snaps, |_| None, b))
    }

    fn snap_for(id: EntityId, sent: i64) -> EntitySnapshot {
        EntitySnapshot {
            id,
            position: [10.0, 0.0, 0.0],
            velocity: [0.0; 3],
            rotation: [0.0; 3],
            custom: String::new(),
            sent,
        }
    }

    #[test]
    fn test_despawn_removes_puppet() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);

        let rival = EntityId {
            index: 9,
            generation: 0,
        };
        send(
            &mut host,
            &Packet::new(
                PacketKind::Snapshot,
                HOST_PEER_ID,
                100,
                snapshot_body(&[snap_for(rival, 100)]),
            ),
        );
        client.pump(&mut globals, &handles, 150);
        assert!(client.estimator.is_tracking(rival));
        handles.physics.drain();
        handles.graphics.drain();

        send(
            &mut host,
            &Packet::new(
                PacketKind::Despawn,
                HOST_PEER_ID,
                200,
                payload(|b| b.write_u32(rival.to_raw())),
            ),
        );
        client.pump(&mut globals, &handles, 250);

        assert!(!client.estimator.is_tracking(rival));
        assert!(handles
            .physics
            .drain()
            .iter()
            .any(|c| matches!(c.cmd, PhysicsCmd::RemoveBody { entity } if entity == rival)));
        assert!(handles
            .graphics
            .drain()
            .iter()
            .any(|c| matches!(c.cmd, GraphicsCmd::RemoveVisual { entity } if entity == rival)));
    }

    #[test]
    fn test_silent_entity_pruned_after_stale_window() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);

        let rival = EntityId {
            index: 9,
            generation: 0,
        };
        send(
            &mut host,
            &Packet::new(
                PacketKind::Snapshot,
                HOST_PEER_ID,
                100,
                snapshot_body(&[snap_for(rival, 100), snap_for(car_id(), 100)]),
            ),
        );
        client.pump(&mut globals, &handles, 150);
        assert!(client.estimator.is_tracking(rival));
        handles.physics.drain();

        // The despawn packet was lost; later broadcasts simply stop carrying
        // the rival, and the sweep catches up with it.
        send(
            &mut host,
            &Packet::new(
                PacketKind::Snapshot,
                HOST_PEER_ID,
                1500,
                snapshot_body(&[snap_for(car_id(), 1500)]),
            ),
        );
        client.pump(&mut globals, &handles, 1550);

        assert!(!client.estimator.is_tracking(rival));
        assert!(client.estimator.is_tracking(car_id()));
        assert!(handles
            .physics
            .drain()
            .iter()
            .any(|c| matches!(c.cmd, PhysicsCmd::RemoveBody { entity } if entity == rival)));
    }

    #[test]
    fn test_connected_client_uploads_move_intent() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);
        drain(&mut host);

        globals.current_input.throttle = 0.7;
        globals.current_input.steer = -0.3;
        client.pump(&mut globals, &handles, 100);

        let intent_pkt = find(&drain(&mut host), PacketKind::MoveIntent).unwrap();
        let intent = MoveIntent::decode(&mut NetReader::new(&intent_pkt.payload)).unwrap();
        assert_eq!(intent.entity, car_id());
        assert_eq!(intent.throttle, 0.7);
        assert_eq!(intent.steer, -0.3);
    }

    #[test]
    fn test_ping_answered_with_echoed_timestamp() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);
        drain(&mut host);

        send(
            &mut host,
            &Packet::new(PacketKind::Ping, HOST_PEER_ID, 5555, Vec::new()),
        );
        client.pump(&mut globals, &handles, 5600);

        let pong = find(&drain(&mut host), PacketKind::Pong).unwrap();
        let echoed = NetReader::new(&pong.payload).read_i64().unwrap();
        assert_eq!(echoed, 5555);
    }

    #[test]
    fn test_host_silence_times_out() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);
        drain(&mut host);

        // net_timeout defaults to 10 seconds.
        client.pump(&mut globals, &handles, 20_000);
        assert_eq!(client.phase(), ClientPhase::Disconnected);
        assert!(client.take_notices().contains(&ClientNotice::HostLost));
    }

    #[test]
    fn test_chat_and_race_events_surface() {
        let (mut client, mut globals, handles, mut host) = setup();
        connect(&mut client, &mut globals, &handles, &mut host);
        client.take_notices();

        send(
            &mut host,
            &Packet::new(PacketKind::Chat, 2, 50, b"nice overtake".to_vec()),
        );
        let event = RaceEvent::CheckpointPassed {
            entity: car_id(),
            checkpoint: 1,
        };
        send(
            &mut host,
            &Packet::new(PacketKind::Checkpoint, HOST_PEER_ID, 60, payload(|b| event.encode(b))),
        );
        client.pump(&mut globals, &handles, 70);

        let notices = client.take_notices();
        assert!(notices.contains(&ClientNotice::Chat {
            from: 2,
            text: "nice overtake".to_string()
        }));
        assert!(notices.contains(&ClientNotice::Race(event)));
    }
}
