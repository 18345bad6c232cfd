//! Double-buffered inbound event queue
//!
//! The backend's I/O context appends into the front buffer through an
//! [`EventSink`]; the control loop swaps front and back under one short lock
//! and drains the back buffer without holding it. Messages are therefore
//! locked once per swap, not once per message.

use crate::observability::metrics::ClientMetrics;
use crate::protocol::InboundMessage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// State shared between the control loop and every sink
#[derive(Debug)]
struct Shared {
    front: Mutex<Vec<InboundMessage>>,
    unexpected_close: AtomicBool,
    epoch: AtomicU64,
    /// Maximum undelivered messages in the front buffer (0 = unbounded)
    capacity: usize,
    metrics: Arc<ClientMetrics>,
}

impl Shared {
    fn front(&self) -> MutexGuard<'_, Vec<InboundMessage>> {
        // A panicking producer leaves the Vec itself intact
        self.front.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }
}

/// Producer handle given to the backend
///
/// Cheap to clone and safe to call from any thread. A sink belongs to the
/// queue epoch it was created in; once the queue is cleared it silently
/// ignores everything.
#[derive(Debug, Clone)]
pub struct EventSink {
    shared: Arc<Shared>,
    epoch: u64,
}

impl EventSink {
    /// Append an inbound message to the front buffer
    ///
    /// Returns `false` when the message was not accepted (stale sink or full queue).
    pub fn on_message(&self, message: InboundMessage) -> bool {
        if !self.shared.is_current(self.epoch) {
            return false;
        }

        let mut front = self.shared.front();
        // Re-check under the lock so a concurrent clear() cannot be raced
        if !self.shared.is_current(self.epoch) {
            return false;
        }

        if self.shared.capacity > 0 && front.len() >= self.shared.capacity {
            drop(front);
            self.shared.metrics.message_dropped();
            return false;
        }

        front.push(message);
        drop(front);
        self.shared.metrics.message_received();
        true
    }

    /// Latch an unexpected connection loss
    pub fn on_connection_closed(&self) {
        if self.shared.is_current(self.epoch) {
            self.shared.unexpected_close.store(true, Ordering::Release);
        }
    }

    /// True while the queue has not been cleared since this sink was created
    pub fn is_active(&self) -> bool {
        self.shared.is_current(self.epoch)
    }
}

/// Consumer side, owned by the control loop
#[derive(Debug)]
pub struct EventQueue {
    shared: Arc<Shared>,
    back: Vec<InboundMessage>,
}

impl EventQueue {
    pub fn new(capacity: usize, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            shared: Arc::new(Shared {
                front: Mutex::new(Vec::new()),
                unexpected_close: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                capacity,
                metrics,
            }),
            back: Vec::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, Arc::new(ClientMetrics::new()))
    }

    /// Producer handle bound to the current epoch
    pub fn sink(&self) -> EventSink {
        EventSink {
            shared: self.shared.clone(),
            epoch: self.shared.epoch.load(Ordering::Acquire),
        }
    }

    /// Swap front and back; the back buffer is always empty beforehand
    fn swap(&mut self) {
        debug_assert!(self.back.is_empty());
        let mut front = self.shared.front();
        std::mem::swap(&mut *front, &mut self.back);
    }

    /// Swap, dispatch every message in the back buffer, clear it; twice
    ///
    /// Messages arriving while the first pass runs are picked up by the
    /// second. Returns the number of messages handed to `dispatch`.
    pub fn drain_tick<F>(&mut self, mut dispatch: F) -> usize
    where
        F: FnMut(&InboundMessage),
    {
        let mut drained = 0;
        for _ in 0..2 {
            self.swap();
            for message in self.back.iter() {
                dispatch(message);
            }
            drained += self.back.len();
            self.back.clear();
        }
        drained
    }

    /// Read and reset the unexpected-close latch
    pub fn take_unexpected_close(&self) -> bool {
        self.shared.unexpected_close.swap(false, Ordering::AcqRel)
    }

    /// Drop all undelivered messages, reset the latch and retire existing sinks
    pub fn clear(&mut self) {
        let mut front = self.shared.front();
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        front.clear();
        drop(front);

        self.back.clear();
        self.shared.unexpected_close.store(false, Ordering::Release);
    }

    /// Messages waiting in the front buffer
    pub fn pending_len(&self) -> usize {
        self.shared.front().len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage::new(topic, payload.as_bytes().to_vec())
    }

    fn drain_topics(queue: &mut EventQueue) -> Vec<String> {
        let mut seen = Vec::new();
        queue.drain_tick(|m| seen.push(m.topic.clone()));
        seen
    }

    #[test]
    fn test_drain_delivers_in_arrival_order() {
        // Arrange
        let mut queue = EventQueue::unbounded();
        let sink = queue.sink();
        sink.on_message(message("a", "1"));
        sink.on_message(message("b", "2"));
        sink.on_message(message("c", "3"));

        // Act
        let seen = drain_topics(&mut queue);

        // Assert
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(drain_topics(&mut queue).is_empty());
    }

    #[test]
    fn test_messages_enqueued_during_first_pass_are_drained_in_same_tick() {
        let mut queue = EventQueue::unbounded();
        let sink = queue.sink();
        sink.on_message(message("first", ""));

        let mut seen = Vec::new();
        let drained = queue.drain_tick(|m| {
            seen.push(m.topic.clone());
            if m.topic == "first" {
                sink.on_message(message("during", ""));
            }
        });

        assert_eq!(drained, 2);
        assert_eq!(seen, vec!["first", "during"]);
    }

    #[test]
    fn test_unexpected_close_latch_is_consumed_once() {
        let queue = EventQueue::unbounded();
        let sink = queue.sink();

        assert!(!queue.take_unexpected_close());
        sink.on_connection_closed();
        assert!(queue.take_unexpected_close());
        assert!(!queue.take_unexpected_close());
    }

    #[test]
    fn test_clear_retires_old_sinks() {
        let mut queue = EventQueue::unbounded();
        let old_sink = queue.sink();
        old_sink.on_message(message("stale", ""));
        old_sink.on_connection_closed();

        queue.clear();

        assert!(!old_sink.is_active());
        assert!(!old_sink.on_message(message("late", "")));
        old_sink.on_connection_closed();
        assert!(!queue.take_unexpected_close());
        assert!(drain_topics(&mut queue).is_empty());

        let new_sink = queue.sink();
        assert!(new_sink.on_message(message("fresh", "")));
        assert_eq!(drain_topics(&mut queue), vec!["fresh"]);
    }

    #[test]
    fn test_bounded_queue_rejects_when_full() {
        let metrics = Arc::new(ClientMetrics::new());
        let mut queue = EventQueue::new(2, metrics.clone());
        let sink = queue.sink();

        assert!(sink.on_message(message("1", "")));
        assert!(sink.on_message(message("2", "")));
        assert!(!sink.on_message(message("3", "")));
        assert_eq!(queue.pending_len(), 2);

        assert_eq!(drain_topics(&mut queue), vec!["1", "2"]);
        assert!(sink.on_message(message("4", "")));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 3);
        assert_eq!(snapshot.messages_dropped, 1);
    }

    #[test]
    fn test_producer_on_other_thread() {
        let mut queue = EventQueue::unbounded();
        let sink = queue.sink();

        let producer = std::thread::spawn(move || {
            for i in 0..1000 {
                sink.on_message(message(&i.to_string(), ""));
            }
        });

        let mut seen = Vec::new();
        while !producer.is_finished() {
            queue.drain_tick(|m| seen.push(m.topic.clone()));
        }
        producer.join().unwrap();
        queue.drain_tick(|m| seen.push(m.topic.clone()));

        let expected: Vec<String> = (0..1000).map(|i: i32| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}
