// host.rs — host-authoritative state sync
//
// The host owns the true state of every replicated entity. Clients send
// move intents; the host simulates and broadcasts delta-encoded snapshots
// against a per-peer baseline. There are no acks, so every KEYFRAME_INTERVAL
// broadcasts the baseline is dropped and a full snapshot goes out, which
// heals any divergence from lost deltas.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use slipstream_common::entity::{EntityId, EntityState};
use slipstream_common::netbuf::{NetBuf, NetReader, MAX_PACKET_LEN};
use slipstream_common::session::{Session, SessionEvent};
use slipstream_common::wire::{
    encode_snapshot_batches, Connect, EntitySnapshot, MoveIntent, Packet, PacketKind, PeerId,
    RaceEvent, Welcome, HOST_PEER_ID, MAX_PAYLOAD_LEN, PROTOCOL_VERSION,
};
use slipstream_engine::command::{GraphicsCmd, PhysicsCmd, Timed};
use slipstream_engine::game_state::{GlobalState, RaceNotice};
use slipstream_engine::run_loop::NetRouter;
use slipstream_engine::subsystem::SubsystemHandles;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Challenges older than this are refused.
const CHALLENGE_TTL_MS: i64 = 30_000;
const PING_INTERVAL_MS: i64 = 1000;
/// Every Nth broadcast is a keyframe: baselines reset, all fields sent.
const KEYFRAME_INTERVAL: u64 = 10;

const CAR_MODEL: &str = "car";
/// Starting grid spacing in world units.
const GRID_SPACING: f32 = 6.0;

struct Challenge {
    addr: SocketAddr,
    nonce: u32,
    issued: i64,
}

pub struct HostSync {
    pub session: Session,
    rng: StdRng,
    challenges: Vec<Challenge>,
    peer_entities: HashMap<PeerId, EntityId>,
    peer_names: HashMap<PeerId, String>,
    baselines: HashMap<PeerId, HashMap<EntityId, EntitySnapshot>>,
    last_intent: HashMap<PeerId, i64>,
    rtt_samples: HashMap<PeerId, Vec<i32>>,
    grid_slot: u16,
    broadcast_seq: u64,
    last_broadcast: i64,
    last_ping: i64,
}

fn payload(f: impl FnOnce(&mut NetBuf)) -> Vec<u8> {
    let mut buf = NetBuf::new(MAX_PACKET_LEN);
    f(&mut buf);
    buf.into_vec()
}

impl HostSync {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            rng: StdRng::from_entropy(),
            challenges: Vec::new(),
            peer_entities: HashMap::new(),
            peer_names: HashMap::new(),
            baselines: HashMap::new(),
            last_intent: HashMap::new(),
            rtt_samples: HashMap::new(),
            grid_slot: 0,
            broadcast_seq: 0,
            last_broadcast: 0,
            last_ping: 0,
        }
    }

    pub fn peer_entity(&self, id: PeerId) -> Option<EntityId> {
        self.peer_entities.get(&id).copied()
    }

    /// Spawn the host player's own car on the grid.
    pub fn spawn_host_car(&mut self, globals: &mut GlobalState, handles: &SubsystemHandles) {
        let entity = self.spawn_car(globals, handles, "host");
        globals.local_entity = Some(entity);
    }

    fn spawn_car(
        &mut self,
        globals: &mut GlobalState,
        handles: &SubsystemHandles,
        name: &str,
    ) -> EntityId {
        let position = [0.0, 0.0, self.grid_slot as f32 * GRID_SPACING];
        self.grid_slot += 1;
        let entity = globals.entities.spawn(EntityState {
            position,
            velocity: [0.0; 3],
            rotation: [0.0; 3],
            custom: format!("driver={}", name),
            replicated: true,
            simulated: true,
        });
        handles.physics.enqueue(Timed::now(PhysicsCmd::AddBody {
            entity,
            position,
            velocity: [0.0; 3],
            rotation: [0.0; 3],
            simulated: true,
        }));
        handles.graphics.enqueue(Timed::now(GraphicsCmd::AddVisual {
            entity,
            model: CAR_MODEL.to_string(),
        }));
        entity
    }

    fn despawn_car(
        &mut self,
        globals: &mut GlobalState,
        handles: &SubsystemHandles,
        entity: EntityId,
        now: i64,
    ) {
        globals.entities.despawn(entity);
        handles
            .physics
            .enqueue(Timed::now(PhysicsCmd::RemoveBody { entity }));
        handles
            .graphics
            .enqueue(Timed::now(GraphicsCmd::RemoveVisual { entity }));
        // Tell the remaining peers so their puppets go away too; a lost
        // despawn heals through the clients' stale-puppet sweep.
        let packet = Packet::new(
            PacketKind::Despawn,
            HOST_PEER_ID,
            now,
            payload(|b| b.write_u32(entity.to_raw())),
        );
        self.session.broadcast(&packet, now);
    }

    // ============================================================
    // Handshake
    // ============================================================

    fn handle_hello(&mut self, from: SocketAddr, now: i64) {
        let nonce: u32 = self.rng.gen();
        self.challenges.retain(|c| c.addr != from);
        self.challenges.push(Challenge {
            addr: from,
            nonce,
            issued: now,
        });
        let packet = Packet::new(
            PacketKind::Challenge,
            HOST_PEER_ID,
            now,
            payload(|b| b.write_u32(nonce)),
        );
        self.session.send_addr(from, &packet);
    }

    fn reject(&mut self, from: SocketAddr, now: i64, reason: &str) {
        log::info!("rejecting {}: {}", from, reason);
        let reason = reason.to_string();
        let packet = Packet::new(
            PacketKind::Reject,
            HOST_PEER_ID,
            now,
            payload(|b| b.write_str(&reason)),
        );
        self.session.send_addr(from, &packet);
    }

    fn handle_connect(
        &mut self,
        globals: &mut GlobalState,
        handles: &SubsystemHandles,
        from: SocketAddr,
        packet: &Packet,
        now: i64,
    ) {
        let mut r = NetReader::new(&packet.payload);
        let connect = match Connect::decode(&mut r) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("bad connect from {}: {}", from, e);
                return;
            }
        };
        if connect.protocol != PROTOCOL_VERSION {
            self.reject(from, now, "protocol version mismatch");
            return;
        }
        if let Some(peer_id) = self.session.peer_by_addr(from).map(|p| p.id) {
            // Retransmitted connect; the welcome we sent may have been lost.
            // Answer it again instead of leaving the client hanging.
            log::debug!("duplicate connect from {}, resending welcome", from);
            if let Some(entity) = self.peer_entities.get(&peer_id).copied() {
                let welcome = Welcome { peer_id, entity };
                let packet = Packet::new(
                    PacketKind::Welcome,
                    HOST_PEER_ID,
                    now,
                    payload(|b| welcome.encode(b)),
                );
                self.session.send_to(peer_id, &packet, now);
            }
            return;
        }

        let valid = self
            .challenges
            .iter()
            .any(|c| c.addr == from && c.nonce == connect.nonce && now - c.issued < CHALLENGE_TTL_MS);
        if !valid {
            self.reject(from, now, "bad challenge");
            return;
        }
        self.challenges.retain(|c| c.addr != from);

        let entity = self.spawn_car(globals, handles, &connect.name);
        let peer_id = self.session.add_peer(from, &connect.name, now);
        self.peer_entities.insert(peer_id, entity);
        self.peer_names.insert(peer_id, connect.name.clone());
        self.baselines.insert(peer_id, HashMap::new());
        log::info!(
            "{} connected as peer {} with entity {:?}",
            connect.name,
            peer_id,
            entity
        );

        let welcome = Welcome { peer_id, entity };
        let packet = Packet::new(
            PacketKind::Welcome,
            HOST_PEER_ID,
            now,
            payload(|b| welcome.encode(b)),
        );
        self.session.send_to(peer_id, &packet, now);
        self.announce(now, &format!("{} joined the race", connect.name));
    }

    // ============================================================
    // In-race traffic
    // ============================================================

    fn handle_move_intent(&mut self, handles: &SubsystemHandles, from: SocketAddr, packet: &Packet) {
        let Some(peer) = self.session.peer_by_addr(from).map(|p| p.id) else {
            return;
        };
        // Unordered transport: apply only the newest intent.
        let last = self.last_intent.entry(peer).or_insert(i64::MIN);
        if packet.timestamp <= *last {
            return;
        }
        *last = packet.timestamp;

        let mut r = NetReader::new(&packet.payload);
        let intent = match MoveIntent::decode(&mut r) {
            Ok(i) => i,
            Err(e) => {
                log::warn!("bad move intent from peer {}: {}", peer, e);
                return;
            }
        };
        if self.peer_entities.get(&peer) != Some(&intent.entity) {
            log::warn!(
                "peer {} sent intent for entity {:?} it does not own",
                peer,
                intent.entity
            );
            return;
        }
        handles.physics.enqueue(Timed::now(PhysicsCmd::Drive {
            entity: intent.entity,
            throttle: intent.throttle,
            steer: intent.steer,
        }));
    }

    fn handle_chat(&mut self, from: SocketAddr, packet: &Packet, now: i64) {
        let Some(peer) = self.session.peer_by_addr(from).map(|p| p.id) else {
            return;
        };
        let relay = Packet::new(PacketKind::Chat, peer, now, packet.payload.clone());
        let ids: Vec<PeerId> = self
            .session
            .peers()
            .iter()
            .map(|p| p.id)
            .filter(|id| *id != peer)
            .collect();
        for id in ids {
            self.session.send_to(id, &relay, now);
        }
    }

    fn handle_pong(&mut self, from: SocketAddr, packet: &Packet, now: i64) {
        let Some(peer) = self.session.peer_by_addr(from).map(|p| p.id) else {
            return;
        };
        let mut r = NetReader::new(&packet.payload);
        let Ok(echoed) = r.read_i64() else {
            return;
        };
        let rtt = (now - echoed).max(0) as i32;
        self.rtt_samples.entry(peer).or_default().push(rtt);
    }

    fn announce(&mut self, now: i64, text: &str) {
        let packet = Packet::new(
            PacketKind::Chat,
            HOST_PEER_ID,
            now,
            text.as_bytes().to_vec(),
        );
        self.session.broadcast(&packet, now);
    }

    // ============================================================
    // Periodic work
    // ============================================================

    /// Average the collected round-trip samples in parallel, then fold the
    /// results back into the peer table, and start the next ping round.
    fn ping_sweep(&mut self, now: i64) {
        if now - self.last_ping < PING_INTERVAL_MS {
            return;
        }
        self.last_ping = now;

        let samples: Vec<(PeerId, Vec<i32>)> = self.rtt_samples.drain().collect();
        let averaged: Vec<(PeerId, i32)> = samples
            .par_iter()
            .filter(|(_, rtts)| !rtts.is_empty())
            .map(|(id, rtts)| {
                let avg = rtts.iter().sum::<i32>() / rtts.len() as i32;
                (*id, avg)
            })
            .collect();
        for (id, ping) in averaged {
            if let Some(peer) = self.session.peer_mut(id) {
                peer.stats.ping_ms = ping;
            }
        }

        let ping = Packet::new(PacketKind::Ping, HOST_PEER_ID, now, Vec::new());
        self.session.broadcast(&ping, now);
    }

    fn broadcast_snapshots(&mut self, globals: &GlobalState, now: i64) {
        let interval = globals.config.sync_settings().broadcast_interval_ms;
        if now - self.last_broadcast < interval {
            return;
        }
        self.last_broadcast = now;
        self.broadcast_seq += 1;
        let keyframe = self.broadcast_seq % KEYFRAME_INTERVAL == 0;

        let snaps: Vec<EntitySnapshot> = globals
            .entities
            .iter()
            .filter(|(_, state)| state.replicated)
            .map(|(id, state)| EntitySnapshot {
                id,
                position: state.position,
                velocity: state.velocity,
                rotation: state.rotation,
                custom: state.custom.clone(),
                sent: now,
            })
            .collect();
        if snaps.is_empty() {
            return;
        }

        let ids: Vec<PeerId> = self.session.peers().iter().map(|p| p.id).collect();
        for peer_id in ids {
            if keyframe {
                self.baselines.insert(peer_id, HashMap::new());
            }
            let baseline = self.baselines.entry(peer_id).or_default();
            let bodies =
                encode_snapshot_batches(&snaps, |id| baseline.get(&id).cloned(), MAX_PAYLOAD_LEN);
            for snap in &snaps {
                baseline.insert(snap.id, snap.clone());
            }
            for body in bodies {
                let packet = Packet::new(PacketKind::Snapshot, HOST_PEER_ID, now, body);
                self.session.send_to(peer_id, &packet, now);
            }
        }
    }

    fn broadcast_race_notices(&mut self, globals: &mut GlobalState, now: i64) {
        for notice in globals.race_notices.drain() {
            let event = match notice {
                RaceNotice::CheckpointPassed { entity, checkpoint } => {
                    Some(RaceEvent::CheckpointPassed { entity, checkpoint })
                }
                RaceNotice::LapCompleted {
                    entity,
                    lap,
                    lap_time_ms,
                } => Some(RaceEvent::LapPassed {
                    entity,
                    lap,
                    lap_time_ms,
                }),
                RaceNotice::Standings { order } => Some(RaceEvent::Ranking { order }),
                RaceNotice::RaceFinished { entity } => {
                    self.announce(now, &format!("car {:?} finished the race", entity));
                    None
                }
            };
            if let Some(event) = event {
                let packet = Packet::new(event.kind(), HOST_PEER_ID, now, payload(|b| event.encode(b)));
                self.session.broadcast(&packet, now);
            }
        }
    }

    fn reap_disconnected(&mut self, globals: &mut GlobalState, handles: &SubsystemHandles, now: i64) {
        for event in self.session.take_events() {
            if let SessionEvent::PeerDisconnected { id, reason } = event {
                if let Some(entity) = self.peer_entities.remove(&id) {
                    self.despawn_car(globals, handles, entity, now);
                }
                self.baselines.remove(&id);
                self.last_intent.remove(&id);
                self.rtt_samples.remove(&id);
                if let Some(name) = self.peer_names.remove(&id) {
                    self.announce(now, &format!("{} left the race ({})", name, reason));
                }
            }
        }
    }

    fn drive_local_car(&mut self, globals: &GlobalState, handles: &SubsystemHandles) {
        if let Some(entity) = globals.local_entity {
            handles.physics.enqueue(Timed::now(PhysicsCmd::Drive {
                entity,
                throttle: globals.current_input.throttle,
                steer: globals.current_input.steer,
            }));
        }
    }
}

impl NetRouter for HostSync {
    fn pump(&mut self, globals: &mut GlobalState, handles: &SubsystemHandles, now: i64) {
        self.session.timeout_ms = (globals.config.value("net_timeout") * 1000.0) as i64;
        self.session.max_send_failures = globals.config.value("net_max_send_failures") as u32;

        for (from, packet) in self.session.poll(now) {
            match packet.kind {
                PacketKind::Hello => self.handle_hello(from, now),
                PacketKind::Connect => self.handle_connect(globals, handles, from, &packet, now),
                PacketKind::MoveIntent => self.handle_move_intent(handles, from, &packet),
                PacketKind::Chat => self.handle_chat(from, &packet, now),
                PacketKind::Pong => self.handle_pong(from, &packet, now),
                PacketKind::Disconnect => {
                    if let Some(peer) = self.session.peer_by_addr(from).map(|p| p.id) {
                        self.session.drop_peer(peer, "quit");
                    }
                }
                other => log::debug!("host ignoring {:?} from {}", other, from),
            }
        }

        self.challenges.retain(|c| now - c.issued < CHALLENGE_TTL_MS);
        self.session.check_timeouts(now);
        self.reap_disconnected(globals, handles, now);

        self.drive_local_car(globals, handles);
        self.broadcast_race_notices(globals, now);
        self.broadcast_snapshots(globals, now);
        self.ping_sweep(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipstream_common::session::{LoopbackTransport, Role, Transport};
    use slipstream_common::wire::decode_snapshot_batch;

    const HOST_ADDR: &str = "127.0.0.1:1";

    fn setup() -> (HostSync, GlobalState, SubsystemHandles, LoopbackTransport) {
        let (host_t, client_t) = LoopbackTransport::pair(9);
        let session = Session::new(Role::Host, Box::new(host_t));
        (
            HostSync::new(session),
            GlobalState::new(),
            SubsystemHandles::new(),
            client_t,
        )
    }

    fn send(t: &mut LoopbackTransport, packet: &Packet) {
        t.send(HOST_ADDR.parse().unwrap(), &packet.encode());
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

    fn connect(
        host: &mut HostSync,
        globals: &mut GlobalState,
        handles: &SubsystemHandles,
        client: &mut LoopbackTransport,
    ) -> Welcome {
        send(client, &Packet::new(PacketKind::Hello, 0, 10, Vec::new()));
        host.pump(globals, handles, 20);
        let challenge = find(&drain(client), PacketKind::Challenge).unwrap();
        let nonce = NetReader::new(&challenge.payload).read_u32().unwrap();

        let connect = Connect {
            nonce,
            protocol: PROTOCOL_VERSION,
            name: "tester".to_string(),
        };
        send(
            client,
            &Packet::new(
                PacketKind::Connect,
                0,
                30,
                payload(|b| connect.encode(b)),
            ),
        );
        host.pump(globals, handles, 40);
        let welcome = find(&drain(client), PacketKind::Welcome).unwrap();
        Welcome::decode(&mut NetReader::new(&welcome.payload)).unwrap()
    }

    #[test]
    fn test_handshake_assigns_peer_and_spawns_car() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);

        assert_eq!(welcome.peer_id, 1);
        assert!(globals.entities.contains(welcome.entity));
        assert_eq!(host.session.peers().len(), 1);
        assert_eq!(host.peer_entity(welcome.peer_id), Some(welcome.entity));
    }

    #[test]
    fn test_protocol_mismatch_rejected() {
        let (mut host, mut globals, handles, mut client) = setup();
        send(&mut client, &Packet::new(PacketKind::Hello, 0, 10, Vec::new()));
        host.pump(&mut globals, &handles, 20);
        let challenge = find(&drain(&mut client), PacketKind::Challenge).unwrap();
        let nonce = NetReader::new(&challenge.payload).read_u32().unwrap();

        let connect = Connect {
            nonce,
            protocol: PROTOCOL_VERSION + 1,
            name: "old client".to_string(),
        };
        send(
            &mut client,
            &Packet::new(PacketKind::Connect, 0, 30, payload(|b| connect.encode(b))),
        );
        host.pump(&mut globals, &handles, 40);

        assert!(find(&drain(&mut client), PacketKind::Reject).is_some());
        assert!(host.session.peers().is_empty());
    }

    #[test]
    fn test_bad_nonce_rejected() {
        let (mut host, mut globals, handles, mut client) = setup();
        let connect = Connect {
            nonce: 0x1234_5678,
            protocol: PROTOCOL_VERSION,
            name: "spoofer".to_string(),
        };
        send(
            &mut client,
            &Packet::new(PacketKind::Connect, 0, 10, payload(|b| connect.encode(b))),
        );
        host.pump(&mut globals, &handles, 20);
        assert!(find(&drain(&mut client), PacketKind::Reject).is_some());
        assert!(host.session.peers().is_empty());
    }

    #[test]
    fn test_duplicate_connect_resends_welcome() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);

        // The client never saw the welcome and retransmits its connect. The
        // nonce was already consumed; the host answers again regardless.
        let retry = Connect {
            nonce: 0,
            protocol: PROTOCOL_VERSION,
            name: "tester".to_string(),
        };
        send(
            &mut client,
            &Packet::new(PacketKind::Connect, 0, 70, payload(|b| retry.encode(b))),
        );
        host.pump(&mut globals, &handles, 80);

        let again = find(&drain(&mut client), PacketKind::Welcome).unwrap();
        let again = Welcome::decode(&mut NetReader::new(&again.payload)).unwrap();
        assert_eq!(again, welcome);
        // No second peer, no second car.
        assert_eq!(host.session.peers().len(), 1);
        assert_eq!(globals.entities.iter().count(), 1);
    }

    #[test]
    fn test_move_intent_drives_owned_car() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);
        handles.physics.drain();

        let intent = MoveIntent {
            entity: welcome.entity,
            throttle: 1.0,
            steer: -0.5,
            buttons: 0,
        };
        send(
            &mut client,
            &Packet::new(
                PacketKind::MoveIntent,
                welcome.peer_id,
                50,
                payload(|b| intent.encode(b)),
            ),
        );
        host.pump(&mut globals, &handles, 60);

        let cmds = handles.physics.drain();
        assert!(cmds.iter().any(|c| matches!(
            c.cmd,
            PhysicsCmd::Drive { entity, throttle, .. }
                if entity == welcome.entity && throttle == 1.0
        )));
    }

    #[test]
    fn test_move_intent_for_foreign_entity_ignored() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);
        let other = globals.entities.spawn(EntityState::default());
        handles.physics.drain();

        let intent = MoveIntent {
            entity: other,
            throttle: 1.0,
            steer: 0.0,
            buttons: 0,
        };
        send(
            &mut client,
            &Packet::new(
                PacketKind::MoveIntent,
                welcome.peer_id,
                50,
                payload(|b| intent.encode(b)),
            ),
        );
        host.pump(&mut globals, &handles, 60);

        let cmds = handles.physics.drain();
        assert!(!cmds
            .iter()
            .any(|c| matches!(c.cmd, PhysicsCmd::Drive { .. })));
    }

    #[test]
    fn test_stale_move_intent_ignored() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);
        handles.physics.drain();

        let newer = MoveIntent {
            entity: welcome.entity,
            throttle: 0.8,
            steer: 0.0,
            buttons: 0,
        };
        let older = MoveIntent {
            entity: welcome.entity,
            throttle: 0.1,
            steer: 0.0,
            buttons: 0,
        };
        // The newer intent arrives first; the reordered older one must lose.
        send(
            &mut client,
            &Packet::new(PacketKind::MoveIntent, welcome.peer_id, 500, payload(|b| newer.encode(b))),
        );
        send(
            &mut client,
            &Packet::new(PacketKind::MoveIntent, welcome.peer_id, 400, payload(|b| older.encode(b))),
        );
        host.pump(&mut globals, &handles, 600);

        let drives: Vec<f32> = handles
            .physics
            .drain()
            .into_iter()
            .filter_map(|c| match c.cmd {
                PhysicsCmd::Drive { throttle, .. } => Some(throttle),
                _ => None,
            })
            .collect();
        assert_eq!(drives, vec![0.8]);
    }

    #[test]
    fn test_snapshots_broadcast_on_interval() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);
        globals.entities.get_mut(welcome.entity).unwrap().position = [42.0, 0.0, 0.0];
        drain(&mut client);

        host.pump(&mut globals, &handles, 200);
        let snapshot = find(&drain(&mut client), PacketKind::Snapshot).unwrap();
        let snaps =
            decode_snapshot_batch(&snapshot.payload, snapshot.timestamp, |_| None).unwrap();
        assert!(snaps
            .iter()
            .any(|s| s.id == welcome.entity && s.position == [42.0, 0.0, 0.0]));
        assert_eq!(snapshot.timestamp, 200);

        // Within the interval: no new snapshot.
        host.pump(&mut globals, &handles, 250);
        assert!(find(&drain(&mut client), PacketKind::Snapshot).is_none());
    }

    #[test]
    fn test_unchanged_delta_is_smaller_than_keyframe() {
        let (mut host, mut globals, handles, mut client) = setup();
        connect(&mut host, &mut globals, &handles, &mut client);
        drain(&mut client);

        host.pump(&mut globals, &handles, 200);
        let first = find(&drain(&mut client), PacketKind::Snapshot).unwrap();
        host.pump(&mut globals, &handles, 400);
        let second = find(&drain(&mut client), PacketKind::Snapshot).unwrap();
        assert!(second.payload.len() < first.payload.len());
    }

    #[test]
    fn test_disconnect_despawns_car() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);

        send(
            &mut client,
            &Packet::new(PacketKind::Disconnect, welcome.peer_id, 90, Vec::new()),
        );
        host.pump(&mut globals, &handles, 100);

        assert!(host.session.peers().is_empty());
        assert!(!globals.entities.contains(welcome.entity));
        assert_eq!(host.peer_entity(welcome.peer_id), None);
    }

    #[test]
    fn test_race_notices_broadcast_as_events() {
        let (mut host, mut globals, handles, mut client) = setup();
        let welcome = connect(&mut host, &mut globals, &handles, &mut client);
        drain(&mut client);

        globals.race_notices.enqueue(RaceNotice::LapCompleted {
            entity: welcome.entity,
            lap: 1,
            lap_time_ms: 61_000,
        });
        globals.race_notices.enqueue(RaceNotice::Standings {
            order: vec![welcome.entity],
        });
        host.pump(&mut globals, &handles, 50);

        let packets = drain(&mut client);
        let lap = find(&packets, PacketKind::LapComplete).unwrap();
        let event = RaceEvent::decode(PacketKind::LapComplete, &mut NetReader::new(&lap.payload))
            .unwrap();
        assert_eq!(
            event,
            RaceEvent::LapPassed {
                entity: welcome.entity,
                lap: 1,
                lap_time_ms: 61_000
            }
        );
        assert!(find(&packets, PacketKind::Ranking).is_some());
    }
}
