// subsystem.rs — audio, graphics and physics managers
//
// Each subsystem owns one command queue and its own entity-keyed state.
// Producers on any thread enqueue; the subsystem drains once per tick on its
// worker thread and applies with the queue lock released. Commands whose
// target entity no longer exists log a warning and are dropped; commands
// with a future apply_at go back on the queue.

use crate::command::{AudioCmd, GraphicsCmd, PhysicsCmd, Timed};
use parking_lot::RwLock;
use slipstream_common::entity::EntityId;
use slipstream_common::math::{self, Vec3};
use slipstream_common::queue::CommandQueue;
use std::collections::HashMap;
use std::sync::Arc;

/// Run on a worker thread, once per engine tick.
pub trait Subsystem: Send {
    fn name(&self) -> &'static str;
    fn tick(&mut self, now: i64, dt_ms: i64);
}

/// Split a drained command list into due commands and ones to re-queue.
fn split_due<T>(drained: Vec<Timed<T>>, now: i64) -> (Vec<Timed<T>>, Vec<Timed<T>>) {
    let mut due = Vec::with_capacity(drained.len());
    let mut deferred = Vec::new();
    for cmd in drained {
        if cmd.is_due(now) {
            due.push(cmd);
        } else {
            deferred.push(cmd);
        }
    }
    (due, deferred)
}

// ============================================================
// Shared pose board
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Vec3,
}

/// Physics publishes integrated poses here after each tick; the engine loop
/// copies them into the entity arena, and the host reads them for snapshots.
/// Keeps readers off the physics thread's own state.
pub type PoseBoard = Arc<RwLock<HashMap<EntityId, Pose>>>;

pub fn new_pose_board() -> PoseBoard {
    Arc::new(RwLock::new(HashMap::new()))
}

// ============================================================
// Audio
// ============================================================

#[derive(Debug, Clone)]
pub struct PlayingSound {
    pub sound: String,
    pub volume: f32,
}

pub struct AudioSystem {
    pub queue: Arc<CommandQueue<Timed<AudioCmd>>>,
    playing: HashMap<EntityId, PlayingSound>,
    listener_position: Vec3,
    listener_rotation: Vec3,
}

impl AudioSystem {
    pub fn new(queue: Arc<CommandQueue<Timed<AudioCmd>>>) -> Self {
        Self {
            queue,
            playing: HashMap::new(),
            listener_position: [0.0; 3],
            listener_rotation: [0.0; 3],
        }
    }

    pub fn playing(&self, entity: EntityId) -> Option<&PlayingSound> {
        self.playing.get(&entity)
    }

    pub fn listener(&self) -> (Vec3, Vec3) {
        (self.listener_position, self.listener_rotation)
    }

    fn apply(&mut self, cmd: AudioCmd) {
        match cmd {
            AudioCmd::Play {
                entity,
                sound,
                volume,
            } => {
                self.playing.insert(entity, PlayingSound { sound, volume });
            }
            AudioCmd::Stop { entity } => {
                if self.playing.remove(&entity).is_none() {
                    log::warn!("audio: stop for unknown entity {:?}", entity);
                }
            }
            AudioCmd::SetListener { position, rotation } => {
                self.listener_position = position;
                self.listener_rotation = rotation;
            }
        }
    }
}

impl Subsystem for AudioSystem {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn tick(&mut self, now: i64, _dt_ms: i64) {
        let (due, deferred) = split_due(self.queue.drain(), now);
        for cmd in due {
            self.apply(cmd.cmd);
        }
        for cmd in deferred {
            self.queue.enqueue(cmd);
        }
    }
}

// ============================================================
// Graphics
// ============================================================

#[derive(Debug, Clone)]
pub struct Visual {
    pub model: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub visible: bool,
}

pub struct GraphicsSystem {
    pub queue: Arc<CommandQueue<Timed<GraphicsCmd>>>,
    visuals: HashMap<EntityId, Visual>,
}

impl GraphicsSystem {
    pub fn new(queue: Arc<CommandQueue<Timed<GraphicsCmd>>>) -> Self {
        Self {
            queue,
            visuals: HashMap::new(),
        }
    }

    pub fn visual(&self, entity: EntityId) -> Option<&Visual> {
        self.visuals.get(&entity)
    }

    pub fn visual_count(&self) -> usize {
        self.visuals.len()
    }

    fn apply(&mut self, cmd: GraphicsCmd) {
        match cmd {
            GraphicsCmd::AddVisual { entity, model } => {
                self.visuals.insert(
                    entity,
                    Visual {
                        model,
                        position: [0.0; 3],
                        rotation: [0.0; 3],
                        visible: true,
                    },
                );
            }
            GraphicsCmd::SetTransform {
                entity,
                position,
                rotation,
            } => match self.visuals.get_mut(&entity) {
                Some(v) => {
                    v.position = position;
                    v.rotation = rotation;
                }
                None => log::warn!("graphics: transform for unknown entity {:?}", entity),
            },
            GraphicsCmd::SetVisible { entity, visible } => {
                match self.visuals.get_mut(&entity) {
                    Some(v) => v.visible = visible,
                    None => log::warn!("graphics: visibility for unknown entity {:?}", entity),
                }
            }
            GraphicsCmd::RemoveVisual { entity } => {
                if self.visuals.remove(&entity).is_none() {
                    log::warn!("graphics: remove for unknown entity {:?}", entity);
                }
            }
        }
    }
}

impl Subsystem for GraphicsSystem {
    fn name(&self) -> &'static str {
        "graphics"
    }

    fn tick(&mut self, now: i64, _dt_ms: i64) {
        let (due, deferred) = split_due(self.queue.drain(), now);
        for cmd in due {
            self.apply(cmd.cmd);
        }
        for cmd in deferred {
            self.queue.enqueue(cmd);
        }
    }
}

// ============================================================
// Physics
// ============================================================

#[derive(Debug, Clone, Copy)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Vec3,
    /// When false the body is a puppet: it holds whatever pose the last
    /// SetPose wrote and integration skips it.
    pub simulated: bool,
    pub throttle: f32,
    pub steer: f32,
}

/// Arcade vehicle constants. Units per second squared, degrees per second,
/// and a flat per-second velocity retention factor.
pub const DRIVE_ACCEL: f32 = 40.0;
pub const TURN_RATE_DEG: f32 = 120.0;
pub const DRAG_PER_SEC: f32 = 0.6;

pub struct PhysicsSystem {
    pub queue: Arc<CommandQueue<Timed<PhysicsCmd>>>,
    bodies: HashMap<EntityId, Body>,
    poses: PoseBoard,
}

impl PhysicsSystem {
    pub fn new(queue: Arc<CommandQueue<Timed<PhysicsCmd>>>, poses: PoseBoard) -> Self {
        Self {
            queue,
            bodies: HashMap::new(),
            poses,
        }
    }

    pub fn body(&self, entity: EntityId) -> Option<&Body> {
        self.bodies.get(&entity)
    }

    fn apply(&mut self, cmd: PhysicsCmd) {
        match cmd {
            PhysicsCmd::AddBody {
                entity,
                position,
                velocity,
                rotation,
                simulated,
            } => {
                self.bodies.insert(
                    entity,
                    Body {
                        position,
                        velocity,
                        rotation,
                        simulated,
                        throttle: 0.0,
                        steer: 0.0,
                    },
                );
            }
            PhysicsCmd::SetPose {
                entity,
                position,
                velocity,
                rotation,
            } => match self.bodies.get_mut(&entity) {
                Some(b) => {
                    b.position = position;
                    b.velocity = velocity;
                    b.rotation = rotation;
                }
                None => log::warn!("physics: pose for unknown entity {:?}", entity),
            },
            PhysicsCmd::SetSimulated { entity, simulated } => {
                match self.bodies.get_mut(&entity) {
                    Some(b) => b.simulated = simulated,
                    None => log::warn!("physics: simulated flag for unknown entity {:?}", entity),
                }
            }
            PhysicsCmd::Drive {
                entity,
                throttle,
                steer,
            } => match self.bodies.get_mut(&entity) {
                Some(b) => {
                    b.throttle = throttle.clamp(-1.0, 1.0);
                    b.steer = steer.clamp(-1.0, 1.0);
                }
                None => log::warn!("physics: drive for unknown entity {:?}", entity),
            },
            PhysicsCmd::ApplyImpulse { entity, impulse } => {
                match self.bodies.get_mut(&entity) {
                    Some(b) => b.velocity = math::vec3_add(&b.velocity, &impulse),
                    None => log::warn!("physics: impulse for unknown entity {:?}", entity),
                }
            }
            PhysicsCmd::RemoveBody { entity } => {
                if self.bodies.remove(&entity).is_none() {
                    log::warn!("physics: remove for unknown entity {:?}", entity);
                }
                self.poses.write().remove(&entity);
            }
        }
    }

    fn integrate(&mut self, dt_ms: i64) {
        let dt = dt_ms as f32 / 1000.0;
        for body in self.bodies.values_mut() {
            if !body.simulated {
                continue;
            }
            body.rotation[1] += body.steer * TURN_RATE_DEG * dt;
            let yaw = body.rotation[1].to_radians();
            let forward = [yaw.cos(), 0.0, yaw.sin()];
            body.velocity = math::vec3_ma(&body.velocity, body.throttle * DRIVE_ACCEL * dt, &forward);
            let drag = DRAG_PER_SEC.powf(dt);
            body.velocity = math::vec3_scale(&body.velocity, drag);
            body.position = math::vec3_ma(&body.position, dt, &body.velocity);
        }
    }

    fn publish(&self) {
        let mut poses = self.poses.write();
        for (id, body) in &self.bodies {
            poses.insert(
                *id,
                Pose {
                    position: body.position,
                    velocity: body.velocity,
                    rotation: body.rotation,
                },
            );
        }
    }
}

impl Subsystem for PhysicsSystem {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn tick(&mut self, now: i64, dt_ms: i64) {
        let (due, deferred) = split_due(self.queue.drain(), now);
        for cmd in due {
            self.apply(cmd.cmd);
        }
        for cmd in deferred {
            self.queue.enqueue(cmd);
        }
        self.integrate(dt_ms);
        self.publish();
    }
}

// ============================================================
// Handles
// ============================================================

/// Producer-side handles, cloneable to any thread.
#[derive(Clone)]
pub struct SubsystemHandles {
    pub audio: Arc<CommandQueue<Timed<AudioCmd>>>,
    pub graphics: Arc<CommandQueue<Timed<GraphicsCmd>>>,
    pub physics: Arc<CommandQueue<Timed<PhysicsCmd>>>,
    pub poses: PoseBoard,
}

impl SubsystemHandles {
    pub fn new() -> Self {
        Self {
            audio: Arc::new(CommandQueue::new()),
            graphics: Arc::new(CommandQueue::new()),
            physics: Arc::new(CommandQueue::new()),
            poses: new_pose_board(),
        }
    }

    /// Build the three systems over these handles.
    pub fn build_systems(&self) -> (AudioSystem, GraphicsSystem, PhysicsSystem) {
        (
            AudioSystem::new(Arc::clone(&self.audio)),
            GraphicsSystem::new(Arc::clone(&self.graphics)),
            PhysicsSystem::new(Arc::clone(&self.physics), Arc::clone(&self.poses)),
        )
    }
}

impl Default for SubsystemHandles {
    fn default() -> Self {
        Self::new()
    }
}
