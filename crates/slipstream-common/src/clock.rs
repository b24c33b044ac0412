// clock.rs — process-wide monotonic timer

use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds since a process-wide epoch. Monotonic, never goes backward.
/// Snapshot send timestamps are expressed in this clock on the host and
/// compared only against other values of the same clock.
pub fn now_ms() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as i64
}
