// wire.rs — packet framing and the sync protocol vocabulary
//
// Every datagram is one packet: a small header, a typed payload, and a
// CRC-16 trailer. The transport underneath is unordered and unreliable;
// nothing here assumes sequencing. Entity snapshots are delta-encoded
// against a per-peer baseline with a field-presence mask, and carry the
// host's send timestamp so receivers can discard stale data.

use crate::entity::EntityId;
use crate::math::Vec3;
use crate::netbuf::{NetBuf, NetReader, WireError, MAX_PACKET_LEN};
use bitflags::bitflags;
use crc::{Crc, CRC_16_IBM_3740};

pub const PROTOCOL_VERSION: u16 = 1;

/// Peer id of the host itself.
pub const HOST_PEER_ID: u16 = 0;
/// Sender id used before the host has assigned one.
pub const UNASSIGNED_PEER_ID: u16 = u16::MAX;

pub type PeerId = u16;

const WIRE_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

// Header: kind (1) + sender (2) + timestamp (8); trailer: crc (2).
const HEADER_LEN: usize = 11;
const TRAILER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Client -> host: request a challenge.
    Hello = 1,
    /// Host -> client: address-verification nonce.
    Challenge = 2,
    /// Client -> host: echo nonce, carry protocol version and name.
    Connect = 3,
    /// Host -> client: connection accepted, peer id assigned.
    Welcome = 4,
    /// Host -> client: connection refused, reason attached.
    Reject = 5,
    /// Either direction: orderly goodbye.
    Disconnect = 6,
    Chat = 7,
    /// Host -> clients: batched authoritative entity snapshots.
    Snapshot = 8,
    /// Client -> host: local input/state delta.
    MoveIntent = 9,
    Checkpoint = 10,
    LapComplete = 11,
    Ranking = 12,
    Ping = 13,
    Pong = 14,
    /// Host -> clients: a replicated entity is gone.
    Despawn = 15,
}

impl PacketKind {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        Ok(match v {
            1 => PacketKind::Hello,
            2 => PacketKind::Challenge,
            3 => PacketKind::Connect,
            4 => PacketKind::Welcome,
            5 => PacketKind::Reject,
            6 => PacketKind::Disconnect,
            7 => PacketKind::Chat,
            8 => PacketKind::Snapshot,
            9 => PacketKind::MoveIntent,
            10 => PacketKind::Checkpoint,
            11 => PacketKind::LapComplete,
            12 => PacketKind::Ranking,
            13 => PacketKind::Ping,
            14 => PacketKind::Pong,
            15 => PacketKind::Despawn,
            other => return Err(WireError::BadKind(other)),
        })
    }
}

/// One framed datagram. `timestamp` is the sender's now_ms() at send time;
/// for snapshot packets it doubles as the authoritative send timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub sender: PeerId,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketKind, sender: PeerId, timestamp: i64, payload: Vec<u8>) -> Self {
        Self {
            kind,
            sender,
            timestamp,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = NetBuf::new(MAX_PACKET_LEN);
        buf.write_u8(self.kind as u8);
        buf.write_u16(self.sender);
        buf.write_i64(self.timestamp);
        buf.write_bytes(&self.payload);
        let crc = WIRE_CRC.checksum(buf.as_slice());
        buf.write_u16(crc);
        if buf.overflowed {
            log::error!(
                "{:?} payload of {} bytes exceeds the packet limit, truncated",
                self.kind,
                self.payload.len()
            );
        }
        buf.into_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(WireError::Truncated {
                wanted: HEADER_LEN + TRAILER_LEN,
                offset: 0,
                len: data.len(),
            });
        }
        let body = &data[..data.len() - TRAILER_LEN];
        let trailer = &data[data.len() - TRAILER_LEN..];
        let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
        if WIRE_CRC.checksum(body) != expected {
            return Err(WireError::BadChecksum);
        }

        let mut r = NetReader::new(body);
        let kind = PacketKind::from_u8(r.read_u8()?)?;
        let sender = r.read_u16()?;
        let timestamp = r.read_i64()?;
        let payload = body[HEADER_LEN..].to_vec();
        Ok(Self {
            kind,
            sender,
            timestamp,
            payload,
        })
    }
}

// ============================================================
// Handshake payloads
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    pub nonce: u32,
    pub protocol: u16,
    pub name: String,
}

impl Connect {
    pub fn encode(&self, buf: &mut NetBuf) {
        buf.write_u32(self.nonce);
        buf.write_u16(self.protocol);
        buf.write_str(&self.name);
    }

    pub fn decode(r: &mut NetReader) -> Result<Self, WireError> {
        Ok(Self {
            nonce: r.read_u32()?,
            protocol: r.read_u16()?,
            name: r.read_str()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    pub peer_id: PeerId,
    /// The entity the host spawned for this peer.
    pub entity: EntityId,
}

impl Welcome {
    pub fn encode(&self, buf: &mut NetBuf) {
        buf.write_u16(self.peer_id);
        buf.write_u32(self.entity.to_raw());
    }

    pub fn decode(r: &mut NetReader) -> Result<Self, WireError> {
        Ok(Self {
            peer_id: r.read_u16()?,
            entity: EntityId::from_raw(r.read_u32()?),
        })
    }
}

// ============================================================
// Entity snapshots
// ============================================================

bitflags! {
    /// Field-presence mask for delta-encoded snapshots. A clear bit means
    /// "unchanged from the receiver's baseline".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SnapFields: u8 {
        const POSITION = 1 << 0;
        const VELOCITY = 1 << 1;
        const ROTATION = 1 << 2;
        const CUSTOM   = 1 << 3;
    }
}

/// Authoritative state record for one entity. Never mutated after creation;
/// a newer snapshot supersedes it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Vec3,
    pub custom: String,
    /// Host clock at broadcast time. Greatest value wins.
    pub sent: i64,
}

impl EntitySnapshot {
    /// Delta-encode against `baseline` (same entity, previously acknowledged
    /// state on the receiver). No baseline writes every field.
    pub fn encode_delta(&self, baseline: Option<&EntitySnapshot>, buf: &mut NetBuf) {
        let mut fields = SnapFields::empty();
        match baseline {
            Some(base) => {
                if self.position != base.position {
                    fields |= SnapFields::POSITION;
                }
                if self.velocity != base.velocity {
                    fields |= SnapFields::VELOCITY;
                }
                if self.rotation != base.rotation {
                    fields |= SnapFields::ROTATION;
                }
                if self.custom != base.custom {
                    fields |= SnapFields::CUSTOM;
                }
            }
            None => {
                fields = SnapFields::all();
            }
        }

        buf.write_u32(self.id.to_raw());
        buf.write_u8(fields.bits());
        if fields.contains(SnapFields::POSITION) {
            buf.write_vec3(&self.position);
        }
        if fields.contains(SnapFields::VELOCITY) {
            buf.write_vec3(&self.velocity);
        }
        if fields.contains(SnapFields::ROTATION) {
            buf.write_vec3(&self.rotation);
        }
        if fields.contains(SnapFields::CUSTOM) {
            buf.write_str(&self.custom);
        }
    }

    /// Inverse of encode_delta. The baseline is looked up once the id has
    /// been read; fields absent from the mask come from it. A missing
    /// baseline with a partial mask means the sender and receiver disagree
    /// about state, so zero defaults are used and the next keyframe heals it.
    pub fn decode_delta(
        baseline: impl Fn(EntityId) -> Option<EntitySnapshot>,
        sent: i64,
        r: &mut NetReader,
    ) -> Result<Self, WireError> {
        let id = EntityId::from_raw(r.read_u32()?);
        let fields = SnapFields::from_bits_truncate(r.read_u8()?);

        let mut snap = match baseline(id) {
            Some(base) => EntitySnapshot { id, sent, ..base },
            None => EntitySnapshot {
                id,
                position: [0.0; 3],
                velocity: [0.0; 3],
                rotation: [0.0; 3],
                custom: String::new(),
                sent,
            },
        };
        if fields.contains(SnapFields::POSITION) {
            snap.position = r.read_vec3()?;
        }
        if fields.contains(SnapFields::VELOCITY) {
            snap.velocity = r.read_vec3()?;
        }
        if fields.contains(SnapFields::ROTATION) {
            snap.rotation = r.read_vec3()?;
        }
        if fields.contains(SnapFields::CUSTOM) {
            snap.custom = r.read_str()?;
        }
        Ok(snap)
    }
}

/// Room left for a payload once the packet header and trailer are paid for.
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN - TRAILER_LEN;

/// Encode a batch of snapshots into a Snapshot packet payload.
pub fn encode_snapshot_batch(
    snaps: &[EntitySnapshot],
    baseline: impl Fn(EntityId) -> Option<EntitySnapshot>,
    buf: &mut NetBuf,
) {
    buf.write_u16(snaps.len() as u16);
    for snap in snaps {
        snap.encode_delta(baseline(snap.id).as_ref(), buf);
    }
}

/// Encode snapshots into as many self-contained batch payloads as needed so
/// none exceeds `max_payload`. A snapshot too large to fit in a packet of
/// its own is dropped with a warning rather than shipped truncated.
pub fn encode_snapshot_batches(
    snaps: &[EntitySnapshot],
    baseline: impl Fn(EntityId) -> Option<EntitySnapshot>,
    max_payload: usize,
) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut body = NetBuf::new(max_payload);
    let mut count: u16 = 0;
    for snap in snaps {
        let mut one = NetBuf::new(max_payload);
        snap.encode_delta(baseline(snap.id).as_ref(), &mut one);
        // 2 bytes go to the count prefix.
        if one.overflowed || 2 + one.len() > max_payload {
            log::warn!("snapshot for {:?} exceeds the packet size, dropped", snap.id);
            continue;
        }
        if count > 0 && 2 + body.len() + one.len() > max_payload {
            out.push(seal_batch(&body, count));
            body = NetBuf::new(max_payload);
            count = 0;
        }
        body.write_bytes(one.as_slice());
        count += 1;
    }
    if count > 0 {
        out.push(seal_batch(&body, count));
    }
    out
}

fn seal_batch(body: &NetBuf, count: u16) -> Vec<u8> {
    let mut payload = NetBuf::new(2 + body.len());
    payload.write_u16(count);
    payload.write_bytes(body.as_slice());
    payload.into_vec()
}

/// Decode a Snapshot packet payload. `sent` is the packet header timestamp.
pub fn decode_snapshot_batch(
    payload: &[u8],
    sent: i64,
    baseline: impl Fn(EntityId) -> Option<EntitySnapshot>,
) -> Result<Vec<EntitySnapshot>, WireError> {
    let mut r = NetReader::new(payload);
    let count = r.read_u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(EntitySnapshot::decode_delta(&baseline, sent, &mut r)?);
    }
    Ok(out)
}

// ============================================================
// Move intent
// ============================================================

/// Per-tick input/state delta from a client's locally controlled entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveIntent {
    pub entity: EntityId,
    /// -1.0 (full brake/reverse) .. 1.0 (full throttle).
    pub throttle: f32,
    /// -1.0 (full left) .. 1.0 (full right).
    pub steer: f32,
    pub buttons: u8,
}

impl MoveIntent {
    pub fn encode(&self, buf: &mut NetBuf) {
        buf.write_u32(self.entity.to_raw());
        buf.write_f32(self.throttle);
        buf.write_f32(self.steer);
        buf.write_u8(self.buttons);
    }

    pub fn decode(r: &mut NetReader) -> Result<Self, WireError> {
        Ok(Self {
            entity: EntityId::from_raw(r.read_u32()?),
            throttle: r.read_f32()?,
            steer: r.read_f32()?,
            buttons: r.read_u8()?,
        })
    }
}

// ============================================================
// Race events
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    CheckpointPassed {
        entity: EntityId,
        checkpoint: u8,
    },
    LapPassed {
        entity: EntityId,
        lap: u8,
        lap_time_ms: u32,
    },
    /// Current standings, leader first.
    Ranking {
        order: Vec<EntityId>,
    },
}

impl RaceEvent {
    pub fn kind(&self) -> PacketKind {
        match self {
            RaceEvent::CheckpointPassed { .. } => PacketKind::Checkpoint,
            RaceEvent::LapPassed { .. } => PacketKind::LapComplete,
            RaceEvent::Ranking { .. } => PacketKind::Ranking,
        }
    }

    pub fn encode(&self, buf: &mut NetBuf) {
        match self {
            RaceEvent::CheckpointPassed { entity, checkpoint } => {
                buf.write_u32(entity.to_raw());
                buf.write_u8(*checkpoint);
            }
            RaceEvent::LapPassed {
                entity,
                lap,
                lap_time_ms,
            } => {
                buf.write_u32(entity.to_raw());
                buf.write_u8(*lap);
                buf.write_u32(*lap_time_ms);
            }
            RaceEvent::Ranking { order } => {
                buf.write_u16(order.len() as u16);
                for id in order {
                    buf.write_u32(id.to_raw());
                }
            }
        }
    }

    pub fn decode(kind: PacketKind, r: &mut NetReader) -> Result<Self, WireError> {
        match kind {
            PacketKind::Checkpoint => Ok(RaceEvent::CheckpointPassed {
                entity: EntityId::from_raw(r.read_u32()?),
                checkpoint: r.read_u8()?,
            }),
            PacketKind::LapComplete => Ok(RaceEvent::LapPassed {
                entity: EntityId::from_raw(r.read_u32()?),
                lap: r.read_u8()?,
                lap_time_ms: r.read_u32()?,
            }),
            PacketKind::Ranking => {
                let count = r.read_u16()? as usize;
                let mut order = Vec::with_capacity(count);
                for _ in 0..count {
                    order.push(EntityId::from_raw(r.read_u32()?));
                }
                Ok(RaceEvent::Ranking { order })
            }
            other => Err(WireError::BadKind(other as u8)),
        }
    }
}
