// inbound.rs — thread-safe datagram queue between socket I/O and simulation
//
// A dedicated I/O thread can receive datagrams and enqueue them for the
// simulation thread; the bounded channel drops on overflow so a flood never
// blocks the receiver.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::net::SocketAddr;

/// Handles typical burst traffic without excessive memory use.
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// A received datagram with source address and arrival time.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub data: Vec<u8>,
    /// now_ms() at receive time.
    pub arrived: i64,
}

pub struct InboundQueue {
    sender: Sender<Datagram>,
    receiver: Receiver<Datagram>,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Clone a sender handle for the I/O thread.
    pub fn sender(&self) -> InboundSender {
        InboundSender {
            sender: self.sender.clone(),
        }
    }

    /// Non-blocking receive for the simulation thread.
    pub fn try_recv(&self) -> Option<Datagram> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_INBOUND_CAPACITY)
    }
}

#[derive(Clone)]
pub struct InboundSender {
    sender: Sender<Datagram>,
}

impl InboundSender {
    /// Returns false if the queue was full (datagram dropped) or the
    /// receiving side has shut down.
    pub fn try_send(&self, dg: Datagram) -> bool {
        match self.sender.try_send(dg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dg(byte: u8) -> Datagram {
        Datagram {
            from: "127.0.0.1:9000".parse().unwrap(),
            data: vec![byte],
            arrived: 1000,
        }
    }

    #[test]
    fn test_send_recv_order() {
        let q = InboundQueue::new(8);
        let tx = q.sender();
        assert!(tx.try_send(dg(1)));
        assert!(tx.try_send(dg(2)));
        assert_eq!(q.try_recv().unwrap().data, vec![1]);
        assert_eq!(q.try_recv().unwrap().data, vec![2]);
        assert!(q.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops() {
        let q = InboundQueue::new(1);
        let tx = q.sender();
        assert!(tx.try_send(dg(1)));
        assert!(!tx.try_send(dg(2)));
        assert_eq!(q.len(), 1);
    }
}
