// command.rs — cross-thread subsystem commands
//
// Every request into a subsystem is one of these closed variants; there is
// no string dispatch and no untyped payloads. Commands reference entities by
// generational id, so a command aimed at a despawned-and-reused slot misses
// instead of hitting the wrong entity.

use slipstream_common::entity::EntityId;
use slipstream_common::math::Vec3;

/// A command plus an optional earliest-apply time. `apply_at: None` runs on
/// the next drain; a future timestamp keeps the command queued until then.
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub cmd: T,
    pub apply_at: Option<i64>,
}

impl<T> Timed<T> {
    pub fn now(cmd: T) -> Self {
        Self {
            cmd,
            apply_at: None,
        }
    }

    pub fn at(cmd: T, apply_at: i64) -> Self {
        Self {
            cmd,
            apply_at: Some(apply_at),
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.apply_at.map_or(true, |t| t <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioCmd {
    /// Start a looping or one-shot sound attached to an entity.
    Play {
        entity: EntityId,
        sound: String,
        volume: f32,
    },
    Stop {
        entity: EntityId,
    },
    /// Move the listener; usually follows the local car once per frame.
    SetListener {
        position: Vec3,
        rotation: Vec3,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsCmd {
    AddVisual {
        entity: EntityId,
        model: String,
    },
    SetTransform {
        entity: EntityId,
        position: Vec3,
        rotation: Vec3,
    },
    SetVisible {
        entity: EntityId,
        visible: bool,
    },
    RemoveVisual {
        entity: EntityId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsCmd {
    AddBody {
        entity: EntityId,
        position: Vec3,
        velocity: Vec3,
        rotation: Vec3,
        simulated: bool,
    },
    /// Overwrite the pose outright. Used for estimated remote entities,
    /// which have simulation disabled and follow the network instead.
    SetPose {
        entity: EntityId,
        position: Vec3,
        velocity: Vec3,
        rotation: Vec3,
    },
    SetSimulated {
        entity: EntityId,
        simulated: bool,
    },
    /// Vehicle control input, held until the next Drive replaces it.
    Drive {
        entity: EntityId,
        throttle: f32,
        steer: f32,
    },
    ApplyImpulse {
        entity: EntityId,
        impulse: Vec3,
    },
    RemoveBody {
        entity: EntityId,
    },
}

/// Per-frame sampled local input, produced on the OS event thread.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputFrame {
    pub throttle: f32,
    pub steer: f32,
    pub buttons: u8,
    pub sampled: i64,
}
