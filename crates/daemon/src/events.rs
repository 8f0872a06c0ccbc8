//! Client event queue.
//!
//! Console processes and terminal helpers notify the browser by enqueuing
//! [`ClientEvent`]s. Delivery is fire-and-forget: the queue keeps the most
//! recent events and clients poll them with `get_events(last_id)`.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use protocol::{ClientEvent, QueuedEvent};

/// Default number of events retained.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Destination for client events.
pub trait ClientEventSink: Send + Sync {
    /// Enqueue an event for delivery to the client.
    fn enque_client_event(&self, event: ClientEvent);
}

struct QueueState {
    next_id: u64,
    events: VecDeque<QueuedEvent>,
}

/// Bounded, sequenced event queue.
pub struct ClientEventQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl ClientEventQueue {
    /// Creates a queue retaining [`DEFAULT_EVENT_CAPACITY`] events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a queue retaining at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: 1,
                events: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Events with an id greater than `last_id`, oldest first.
    pub fn events_since(&self, last_id: u64) -> Vec<QueuedEvent> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .events
            .iter()
            .filter(|e| e.id > last_id)
            .cloned()
            .collect()
    }

    /// Id of the newest event, or 0 when nothing was ever queued.
    pub fn latest_id(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id - 1
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClientEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientEventSink for ClientEventQueue {
    fn enque_client_event(&self, event: ClientEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id;
        state.next_id += 1;
        tracing::trace!(event_id = id, event = ?event, "Queued client event");
        state.events.push_back(QueuedEvent { id, event });
        while state.events.len() > self.capacity {
            state.events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear(id: &str) -> ClientEvent {
        ClientEvent::ClearTerminal { id: id.to_string() }
    }

    #[test]
    fn test_ids_are_sequential() {
        let queue = ClientEventQueue::new();
        assert_eq!(queue.latest_id(), 0);
        queue.enque_client_event(clear("a"));
        queue.enque_client_event(clear("b"));

        let events = queue.events_since(0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, 1);
        assert_eq!(events[1].id, 2);
        assert_eq!(queue.latest_id(), 2);
    }

    #[test]
    fn test_events_since_filters() {
        let queue = ClientEventQueue::new();
        for name in ["a", "b", "c"] {
            queue.enque_client_event(clear(name));
        }
        let events = queue.events_since(2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, clear("c"));
        assert!(queue.events_since(3).is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let queue = ClientEventQueue::with_capacity(2);
        for name in ["a", "b", "c"] {
            queue.enque_client_event(clear(name));
        }
        assert_eq!(queue.len(), 2);
        let events = queue.events_since(0);
        assert_eq!(events[0].id, 2);
        assert_eq!(events[1].id, 3);
    }
}
