// worker.rs — one OS thread per subsystem
//
// The engine loop signals every worker once per tick; each worker drains its
// subsystem's queue and runs its tick on its own thread. A worker still busy
// with the previous tick skips the signal rather than queueing a backlog.
// Shutdown sets a shared flag and joins all threads.

use crate::subsystem::Subsystem;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct TickSignal {
    pub now: i64,
    pub dt_ms: i64,
}

struct Worker {
    name: &'static str,
    tick_tx: Sender<TickSignal>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Move a subsystem onto its own named thread.
    pub fn spawn(&mut self, mut subsystem: Box<dyn Subsystem>) {
        let name = subsystem.name();
        // Capacity 1: at most one pending tick; further signals are skipped.
        let (tick_tx, tick_rx) = bounded::<TickSignal>(1);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = std::thread::Builder::new()
            .name(format!("subsys-{}", name))
            .spawn(move || {
                log::debug!("{} worker started", subsystem.name());
                loop {
                    match tick_rx.recv_timeout(Duration::from_millis(10)) {
                        Ok(signal) => subsystem.tick(signal.now, signal.dt_ms),
                        Err(RecvTimeoutError::Timeout) => {
                            if shutdown.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("{} worker stopped", subsystem.name());
            })
            .expect("failed to spawn subsystem worker");

        self.workers.push(Worker {
            name,
            tick_tx,
            handle: Some(handle),
        });
    }

    /// Fan a tick signal out to every worker. Non-blocking; a worker that
    /// has not finished its previous tick misses this one.
    pub fn signal_tick(&self, now: i64, dt_ms: i64) {
        for worker in &self.workers {
            if worker.tick_tx.try_send(TickSignal { now, dt_ms }).is_err() {
                log::warn!("{} worker behind, tick skipped", worker.name);
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::error!("{} worker panicked", worker.name);
                }
            }
        }
        self.workers.clear();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
