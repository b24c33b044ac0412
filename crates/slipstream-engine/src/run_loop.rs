// run_loop.rs — the central engine tick
//
// One tick: apply any pending state transition, pump the network, drain
// input, process the active state, then signal the subsystem workers. Each
// phase runs under a panic guard; a panicking phase abandons the rest of
// the tick and records which phase failed, and the loop carries on at the
// next iteration instead of taking the process down.
//
// Pausing stops state processing and subsystem ticks but not the network
// pump, so a paused peer keeps answering and never times out.

use crate::game_state::{ActiveState, GlobalState, StateKind};
use crate::subsystem::SubsystemHandles;
use crate::worker::WorkerPool;
use slipstream_common::clock::now_ms;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on per-tick elapsed time. A stall (debugger, laptop sleep)
/// shows up as one clamped tick, not a huge simulation jump.
pub const MAX_TICK_MS: i64 = 50;

/// Target tick interval when running the loop ourselves.
pub const TICK_INTERVAL_MS: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Transition,
    Network,
    Input,
    State,
    Subsystems,
}

/// The engine's hook into whichever network role is active. The host's
/// broadcaster and the client's sync endpoint both implement this; the loop
/// itself stays role-agnostic.
pub trait NetRouter: Send {
    /// Drain inbound packets, apply them, and send what is due this tick.
    fn pump(&mut self, globals: &mut GlobalState, handles: &SubsystemHandles, now: i64);
}

pub struct EngineLoop {
    pub globals: GlobalState,
    pub handles: SubsystemHandles,
    state: ActiveState,
    workers: WorkerPool,
    router: Option<Box<dyn NetRouter>>,
    last_tick: i64,
    pub last_dt_ms: i64,
    pub tick_count: u64,
    /// Phase of the most recently abandoned tick, for diagnostics.
    pub last_panic: Option<TickPhase>,
}

impl EngineLoop {
    pub fn new(initial: StateKind) -> Self {
        Self {
            globals: GlobalState::new(),
            handles: SubsystemHandles::new(),
            state: ActiveState::from_kind(initial),
            workers: WorkerPool::new(),
            router: None,
            last_tick: now_ms(),
            last_dt_ms: 0,
            tick_count: 0,
            last_panic: None,
        }
    }

    pub fn set_router(&mut self, router: Box<dyn NetRouter>) {
        self.router = Some(router);
    }

    /// Spawn audio, graphics and physics on their worker threads.
    pub fn spawn_default_workers(&mut self) {
        let (audio, graphics, physics) = self.handles.build_systems();
        self.workers.spawn(Box::new(audio));
        self.workers.spawn(Box::new(graphics));
        self.workers.spawn(Box::new(physics));
    }

    pub fn state(&self) -> &ActiveState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ActiveState {
        &mut self.state
    }

    pub fn state_kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Run one tick at the given time. Returns false when a phase panicked
    /// and the rest of the tick was abandoned; the next call runs normally.
    pub fn run_tick(&mut self, now: i64) -> bool {
        let dt = (now - self.last_tick).clamp(0, MAX_TICK_MS);
        self.last_tick = now;
        self.last_dt_ms = dt;

        if !self.run_phase(TickPhase::Transition, |e| e.apply_transition(now)) {
            return false;
        }

        // The network pump runs paused or not.
        if !self.run_phase(TickPhase::Network, |e| {
            if let Some(router) = e.router.as_mut() {
                router.pump(&mut e.globals, &e.handles, now);
            }
        }) {
            return false;
        }

        if self.globals.pause.is_paused() {
            return true;
        }

        if !self.run_phase(TickPhase::Input, |e| e.drain_input()) {
            return false;
        }

        if !self.run_phase(TickPhase::State, |e| {
            e.sync_poses();
            // Split borrow: the state machine never touches the loop itself.
            let state = &mut e.state;
            state.process(&mut e.globals, &e.handles, now, dt);
        }) {
            return false;
        }

        if !self.run_phase(TickPhase::Subsystems, |e| e.workers.signal_tick(now, dt)) {
            return false;
        }

        self.tick_count += 1;
        true
    }

    /// Drive ticks until the stop flag is set. Sleeps longer while paused.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            self.run_tick(now_ms());
            let sleep_ms = if self.globals.pause.is_paused() {
                MAX_TICK_MS as u64
            } else {
                TICK_INTERVAL_MS
            };
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
    }

    pub fn shutdown(&mut self) {
        self.workers.shutdown();
    }

    fn run_phase(&mut self, phase: TickPhase, f: impl FnOnce(&mut Self)) -> bool {
        match catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(()) => true,
            Err(_) => {
                log::error!("panic during {:?} phase, tick abandoned", phase);
                self.last_panic = Some(phase);
                false
            }
        }
    }

    fn apply_transition(&mut self, now: i64) {
        let Some(kind) = self.globals.transition.take() else {
            return;
        };
        if kind == self.state.kind() {
            return;
        }
        self.state.on_exit(&mut self.globals, now);
        self.state = ActiveState::from_kind(kind);
        self.state.on_enter(&mut self.globals, now);
    }

    fn drain_input(&mut self) {
        // Keep only the newest sampled frame; stale frames are worthless.
        for frame in self.globals.input.drain() {
            if frame.sampled >= self.globals.current_input.sampled {
                self.globals.current_input = frame;
            }
        }
    }

    /// Copy worker-published physics poses into the entity arena so states
    /// and the network see this tick's positions.
    fn sync_poses(&mut self) {
        let poses = self.handles.poses.read();
        for (id, pose) in poses.iter() {
            if let Some(entity) = self.globals.entities.get_mut(*id) {
                entity.position = pose.position;
                entity.velocity = pose.velocity;
                entity.rotation = pose.rotation;
            }
        }
    }
}

impl Drop for EngineLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
