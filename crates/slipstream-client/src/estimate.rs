// estimate.rs — client-side entity state estimation
//
// Remote entities only ever receive authoritative snapshots at broadcast
// rate; between snapshots the estimator runs them forward so motion stays
// continuous on screen. When a new snapshot disagrees with what is being
// displayed, the difference is folded in as a correction that decays to
// zero over the smoothing window instead of popping the entity to the new
// pose. A disagreement too large to smooth reads as a teleport and snaps.

use slipstream_common::config::{EstimationMode, SyncSettings};
use slipstream_common::entity::EntityId;
use slipstream_common::math::{self, Vec3};
use slipstream_common::wire::EntitySnapshot;
use std::collections::{HashMap, VecDeque};

/// Snapshots kept per entity for delayed playback.
const HISTORY_CAP: usize = 32;
/// Forward extrapolation is capped; beyond this the entity holds still
/// rather than flying off on stale velocity.
const MAX_EXTRAPOLATION_MS: i64 = 500;
/// Positional disagreement beyond this is treated as a teleport.
const TELEPORT_DIST: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatedPose {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug)]
struct Track {
    /// Ordered by sent timestamp, newest at the back.
    history: VecDeque<EntitySnapshot>,
    error_position: Vec3,
    error_rotation: Vec3,
    /// None while no correction is pending.
    error_started: Option<i64>,
}

impl Track {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            error_position: [0.0; 3],
            error_rotation: [0.0; 3],
            error_started: None,
        }
    }

    fn newest(&self) -> Option<&EntitySnapshot> {
        self.history.back()
    }

    /// Pose from snapshots alone, before smoothing.
    fn raw_pose(&self, now: i64, settings: &SyncSettings) -> Option<EstimatedPose> {
        let newest = self.newest()?;
        match settings.mode {
            EstimationMode::None => Some(EstimatedPose {
                position: newest.position,
                velocity: newest.velocity,
                rotation: newest.rotation,
            }),
            EstimationMode::Extrapolate => {
                let elapsed = (now - newest.sent).clamp(0, MAX_EXTRAPOLATION_MS);
                let dt = elapsed as f32 / 1000.0;
                Some(EstimatedPose {
                    position: math::vec3_ma(&newest.position, dt, &newest.velocity),
                    velocity: newest.velocity,
                    rotation: newest.rotation,
                })
            }
            EstimationMode::DelayedPlayback => {
                let target = now - settings.estimation_delay_ms;
                self.playback_at(target)
            }
        }
    }

    /// Interpolate within the history at the target time. Before the oldest
    /// snapshot the oldest pose holds; past the newest the newest holds.
    fn playback_at(&self, target: i64) -> Option<EstimatedPose> {
        let newest = self.history.back()?;
        let oldest = self.history.front()?;
        if target >= newest.sent {
            return Some(pose_of(newest));
        }
        if target <= oldest.sent {
            return Some(pose_of(oldest));
        }
        for (a, b) in self.history.iter().zip(self.history.iter().skip(1)) {
            if a.sent <= target && target < b.sent {
                let span = (b.sent - a.sent) as f32;
                let t = (target - a.sent) as f32 / span;
                return Some(EstimatedPose {
                    position: math::vec3_lerp(&a.position, &b.position, t),
                    velocity: math::vec3_lerp(&a.velocity, &b.velocity, t),
                    rotation: math::angles_lerp(&a.rotation, &b.rotation, t),
                });
            }
        }
        Some(pose_of(newest))
    }

    /// Remaining correction at `now`, linearly decaying over the window.
    fn correction(&self, now: i64, smoothing_ms: i64) -> (Vec3, Vec3) {
        let Some(started) = self.error_started else {
            return ([0.0; 3], [0.0; 3]);
        };
        if smoothing_ms <= 0 {
            return ([0.0; 3], [0.0; 3]);
        }
        let elapsed = now - started;
        if elapsed < 0 || elapsed >= smoothing_ms {
            return ([0.0; 3], [0.0; 3]);
        }
        let frac = 1.0 - elapsed as f32 / smoothing_ms as f32;
        (
            math::vec3_scale(&self.error_position, frac),
            math::vec3_scale(&self.error_rotation, frac),
        )
    }
}

fn pose_of(snap: &EntitySnapshot) -> EstimatedPose {
    EstimatedPose {
        position: snap.position,
        velocity: snap.velocity,
        rotation: snap.rotation,
    }
}

pub struct Estimator {
    tracks: HashMap<EntityId, Track>,
}

impl Estimator {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
        }
    }

    /// Newest accepted snapshot for an entity; doubles as the delta baseline
    /// for decoding the next batch.
    pub fn newest(&self, entity: EntityId) -> Option<&EntitySnapshot> {
        self.tracks.get(&entity).and_then(|t| t.newest())
    }

    pub fn tracked(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_tracking(&self, entity: EntityId) -> bool {
        self.tracks.contains_key(&entity)
    }

    pub fn forget(&mut self, entity: EntityId) {
        self.tracks.remove(&entity);
    }

    /// Accept a snapshot. Returns false when it is stale, i.e. not newer
    /// than the newest already held; arrival order does not matter, only
    /// the host's send timestamp.
    pub fn ingest(&mut self, snap: EntitySnapshot, arrived: i64, settings: &SyncSettings) -> bool {
        let track = self.tracks.entry(snap.id).or_insert_with(Track::new);
        if let Some(newest) = track.newest() {
            if snap.sent <= newest.sent {
                log::debug!("stale snapshot for {:?} discarded", snap.id);
                return false;
            }
        }

        // What was on screen just before this snapshot, so the switch to
        // the new authoritative state can be smoothed. Only extrapolation
        // produces visible disagreement; playback and verbatim modes snap.
        let displayed = if settings.mode == EstimationMode::Extrapolate {
            track.raw_pose(arrived, settings).map(|raw| {
                let (cp, cr) = track.correction(arrived, settings.smoothing_ms);
                (
                    math::vec3_add(&raw.position, &cp),
                    math::vec3_add(&raw.rotation, &cr),
                )
            })
        } else {
            None
        };

        track.history.push_back(snap);
        if track.history.len() > HISTORY_CAP {
            track.history.pop_front();
        }

        if let (Some((old_position, old_rotation)), Some(new_raw)) =
            (displayed, track.raw_pose(arrived, settings))
        {
            let error = math::vec3_sub(&old_position, &new_raw.position);
            if math::vec3_length(&error) > TELEPORT_DIST {
                track.error_position = [0.0; 3];
                track.error_rotation = [0.0; 3];
                track.error_started = None;
            } else {
                track.error_position = error;
                track.error_rotation = math::vec3_sub(&old_rotation, &new_raw.rotation);
                track.error_started = Some(arrived);
            }
        }
        true
    }

    /// Estimated display pose at `now`, or None for an unknown entity.
    pub fn pose(&self, entity: EntityId, now: i64, settings: &SyncSettings) -> Option<EstimatedPose> {
        let track = self.tracks.get(&entity)?;
        let raw = track.raw_pose(now, settings)?;
        if settings.mode != EstimationMode::Extrapolate {
            return Some(raw);
        }
        let (cp, cr) = track.correction(now, settings.smoothing_ms);
        Some(EstimatedPose {
            position: math::vec3_add(&raw.position, &cp),
            velocity: raw.velocity,
            rotation: math::vec3_add(&raw.rotation, &cr),
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.tracks.keys().copied()
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new()
    }
}
