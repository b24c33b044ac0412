// queue.rs — cross-thread command queue, one per owning subsystem
//
// Any thread enqueues; only the owning thread drains. The drain swaps the
// live list out under the lock and applies commands after releasing it, so
// producers never wait on command execution, only on an append.

use parking_lot::Mutex;

pub struct CommandQueue<T> {
    inner: Mutex<Vec<T>>,
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Callable from any thread. The critical section is a single append.
    pub fn enqueue(&self, cmd: T) {
        self.inner.lock().push(cmd);
    }

    /// Swap the pending list out and return it in FIFO order. Callable only
    /// from the owning thread, once per tick; the caller applies the
    /// commands with the lock already released.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_fifo_single_producer() {
        let q = CommandQueue::new();
        for i in 0..100 {
            q.enqueue(i);
        }
        assert_eq!(q.drain(), (0..100).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn test_per_producer_fifo_across_threads() {
        // Commands are (producer, seq); after a full drain every producer's
        // own commands must appear in its enqueue order.
        let q = Arc::new(CommandQueue::new());
        let producers = 8;
        let per_producer = 500;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for seq in 0..per_producer {
                        q.enqueue((p, seq));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let drained = q.drain();
        assert_eq!(drained.len(), producers * per_producer);

        let mut next = vec![0usize; producers];
        for (p, seq) in drained {
            assert_eq!(seq, next[p], "producer {} out of order", p);
            next[p] += 1;
        }
    }

    #[test]
    fn test_enqueue_not_blocked_by_slow_apply() {
        // The drain returns before commands are applied, so an enqueue racing
        // a slow apply pass must complete quickly.
        let q = Arc::new(CommandQueue::new());
        for i in 0..32 {
            q.enqueue(i);
        }

        let drained = q.drain();
        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || {
            let start = Instant::now();
            for i in 0..1000 {
                q2.enqueue(i);
            }
            start.elapsed()
        });

        // Simulate a long apply of the swapped-out list.
        for _ in &drained {
            thread::sleep(Duration::from_micros(50));
        }

        let elapsed = producer.join().unwrap();
        assert!(
            elapsed < Duration::from_millis(100),
            "enqueue stalled for {:?} during apply",
            elapsed
        );
        assert_eq!(q.len(), 1000);
    }

    #[test]
    fn test_drain_leaves_queue_usable() {
        let q = CommandQueue::new();
        q.enqueue(1);
        assert_eq!(q.drain(), vec![1]);
        q.enqueue(2);
        assert_eq!(q.drain(), vec![2]);
    }
}
