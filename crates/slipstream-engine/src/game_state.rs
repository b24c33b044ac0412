// game_state.rs — engine globals and the active game state machine
//
// Exactly one state is active at a time. Transitions are requested from any
// thread into a single pending slot (last write wins) and applied by the
// engine loop at the top of the next tick, so on_exit/on_enter always run on
// the loop thread between full ticks.

use crate::command::InputFrame;
use crate::subsystem::SubsystemHandles;
use parking_lot::Mutex;
use slipstream_common::config::ConfigContext;
use slipstream_common::entity::{EntityArena, EntityId};
use slipstream_common::math::{self, Vec3};
use slipstream_common::queue::CommandQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================
// Shared control handles
// ============================================================

/// Pending state transition, writable from any thread. A second request
/// before the loop picks one up simply replaces the first.
#[derive(Clone, Default)]
pub struct TransitionSlot {
    inner: Arc<Mutex<Option<StateKind>>>,
}

impl TransitionSlot {
    pub fn request(&self, kind: StateKind) {
        *self.inner.lock() = Some(kind);
    }

    pub fn take(&self) -> Option<StateKind> {
        self.inner.lock().take()
    }
}

/// Pause flag shared with UI and network threads. While set, the loop
/// skips state processing and subsystem ticks but keeps serving the
/// network, so a paused host still answers its clients.
#[derive(Clone, Default)]
pub struct PauseFlag {
    inner: Arc<AtomicBool>,
}

impl PauseFlag {
    pub fn pause(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

// ============================================================
// Globals
// ============================================================

pub struct GlobalState {
    pub entities: EntityArena,
    pub config: ConfigContext,
    /// OS event thread enqueues; the loop drains once per tick and keeps
    /// the newest frame as the current input.
    pub input: CommandQueue<InputFrame>,
    pub current_input: InputFrame,
    pub local_entity: Option<EntityId>,
    pub transition: TransitionSlot,
    pub pause: PauseFlag,
    /// Race notices produced by state processing, drained by the network
    /// router on the next tick for broadcast.
    pub race_notices: CommandQueue<RaceNotice>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self {
            entities: EntityArena::new(),
            config: ConfigContext::new(),
            input: CommandQueue::new(),
            current_input: InputFrame::default(),
            local_entity: None,
            transition: TransitionSlot::default(),
            pause: PauseFlag::default(),
            race_notices: CommandQueue::new(),
        }
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// States
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Menu,
    Loading,
    Race,
    Results,
}

#[derive(Debug, Default)]
pub struct MenuState;

#[derive(Debug, Default)]
pub struct LoadingState {
    pub progress: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RaceProgress {
    pub next_checkpoint: usize,
    pub lap: u8,
    pub lap_started: i64,
}

/// Race bookkeeping the host is authoritative over. Checkpoint radius is in
/// world units; an entity inside the radius of its next checkpoint passes it.
#[derive(Debug)]
pub struct RaceState {
    pub checkpoints: Vec<Vec3>,
    pub checkpoint_radius: f32,
    pub total_laps: u8,
    pub progress: HashMap<EntityId, RaceProgress>,
    events: Vec<RaceNotice>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaceNotice {
    CheckpointPassed {
        entity: EntityId,
        checkpoint: u8,
    },
    LapCompleted {
        entity: EntityId,
        lap: u8,
        lap_time_ms: u32,
    },
    RaceFinished {
        entity: EntityId,
    },
    /// Standings after any progress change, leader first.
    Standings {
        order: Vec<EntityId>,
    },
}

impl RaceState {
    pub fn new(checkpoints: Vec<Vec3>, total_laps: u8) -> Self {
        Self {
            checkpoints,
            checkpoint_radius: 8.0,
            total_laps,
            progress: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn enroll(&mut self, entity: EntityId, now: i64) {
        self.progress.insert(
            entity,
            RaceProgress {
                next_checkpoint: 0,
                lap: 0,
                lap_started: now,
            },
        );
    }

    /// Advance checkpoint/lap tracking from current entity positions.
    pub fn advance(&mut self, entities: &EntityArena, now: i64) {
        if self.checkpoints.is_empty() {
            return;
        }
        for (id, prog) in self.progress.iter_mut() {
            let Some(state) = entities.get(*id) else {
                continue;
            };
            if prog.lap >= self.total_laps {
                continue;
            }
            let target = &self.checkpoints[prog.next_checkpoint];
            if math::vec3_dist(&state.position, target) > self.checkpoint_radius {
                continue;
            }
            self.events.push(RaceNotice::CheckpointPassed {
                entity: *id,
                checkpoint: prog.next_checkpoint as u8,
            });
            prog.next_checkpoint += 1;
            if prog.next_checkpoint == self.checkpoints.len() {
                prog.next_checkpoint = 0;
                prog.lap += 1;
                self.events.push(RaceNotice::LapCompleted {
                    entity: *id,
                    lap: prog.lap,
                    lap_time_ms: (now - prog.lap_started) as u32,
                });
                prog.lap_started = now;
                if prog.lap >= self.total_laps {
                    self.events.push(RaceNotice::RaceFinished { entity: *id });
                }
            }
        }
    }

    /// Entities ordered by race position (laps, then checkpoints reached).
    pub fn ranking(&self) -> Vec<EntityId> {
        let mut order: Vec<(EntityId, u8, usize)> = self
            .progress
            .iter()
            .map(|(id, p)| (*id, p.lap, p.next_checkpoint))
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));
        order.into_iter().map(|(id, _, _)| id).collect()
    }

    pub fn take_notices(&mut self) -> Vec<RaceNotice> {
        std::mem::take(&mut self.events)
    }
}

#[derive(Debug, Default)]
pub struct ResultsState {
    pub final_ranking: Vec<EntityId>,
}

pub enum ActiveState {
    Menu(MenuState),
    Loading(LoadingState),
    Race(RaceState),
    Results(ResultsState),
}

impl ActiveState {
    pub fn kind(&self) -> StateKind {
        match self {
            ActiveState::Menu(_) => StateKind::Menu,
            ActiveState::Loading(_) => StateKind::Loading,
            ActiveState::Race(_) => StateKind::Race,
            ActiveState::Results(_) => StateKind::Results,
        }
    }

    pub fn from_kind(kind: StateKind) -> Self {
        match kind {
            StateKind::Menu => ActiveState::Menu(MenuState),
            StateKind::Loading => ActiveState::Loading(LoadingState::default()),
            StateKind::Race => ActiveState::Race(RaceState::new(Vec::new(), 3)),
            StateKind::Results => ActiveState::Results(ResultsState::default()),
        }
    }

    pub fn on_enter(&mut self, globals: &mut GlobalState, now: i64) {
        log::info!("entering state {:?}", self.kind());
        if let ActiveState::Race(race) = self {
            for (id, _) in globals.entities.iter() {
                race.enroll(id, now);
            }
        }
    }

    pub fn on_exit(&mut self, _globals: &mut GlobalState, _now: i64) {
        log::info!("leaving state {:?}", self.kind());
    }

    pub fn process(
        &mut self,
        globals: &mut GlobalState,
        _handles: &SubsystemHandles,
        now: i64,
        dt_ms: i64,
    ) {
        match self {
            ActiveState::Menu(_) => {}
            ActiveState::Loading(loading) => {
                loading.progress = (loading.progress + dt_ms as f32 / 1000.0).min(1.0);
                if loading.progress >= 1.0 {
                    globals.transition.request(StateKind::Race);
                }
            }
            ActiveState::Race(race) => {
                race.advance(&globals.entities, now);
                let notices = race.take_notices();
                if !notices.is_empty() {
                    let order = race.ranking();
                    for notice in notices {
                        globals.race_notices.enqueue(notice);
                    }
                    globals.race_notices.enqueue(RaceNotice::Standings { order });
                }
            }
            ActiveState::Results(_) => {}
        }
    }
}
