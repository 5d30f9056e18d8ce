//! Outbound message queue used while the socket is down

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A message written while not connected
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Frame `type`
    pub kind: String,
    pub payload: serde_json::Value,
    pub enqueued_at: Instant,
}

impl QueuedMessage {
    /// Wire form: the payload object with `type` set to `kind`
    pub fn to_frame(&self) -> String {
        let mut frame = match &self.payload {
            serde_json::Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        frame.insert("type".to_string(), serde_json::Value::String(self.kind.clone()));
        serde_json::Value::Object(frame).to_string()
    }
}

/// Bounded ring buffer; the oldest entry is evicted when full
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    entries: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append, evicting the oldest entry at capacity. Returns the evicted entry.
    pub fn push(&mut self, message: QueuedMessage) -> Option<QueuedMessage> {
        if self.capacity == 0 {
            return Some(message);
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(message);
        evicted
    }

    /// Remove everything, returning only entries younger than `window` in FIFO order
    pub fn drain_fresh(&mut self, now: Instant, window: Duration) -> Vec<QueuedMessage> {
        self.entries
            .drain(..)
            .filter(|m| now.saturating_duration_since(m.enqueued_at) < window)
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
