//! Log-storm suppression
//!
//! During a sustained outage the same failure repeats every reconnect or every
//! backfill window. `LogThrottle` lets the first occurrence of a key through,
//! swallows repeats for a cooldown window, and reports how many were dropped
//! when the key is next allowed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default cooldown between two log lines for the same key
pub const DEFAULT_LOG_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct KeyState {
    last_emitted: Instant,
    suppressed: u64,
}

/// Deduplicates repeated identical errors within a cooldown window
#[derive(Debug)]
pub struct LogThrottle {
    cooldown: Duration,
    keys: Mutex<HashMap<String, KeyState>>,
}

impl LogThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Some(suppressed_since_last)` if the caller should log now
    pub fn check(&self, key: &str) -> Option<u64> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Option<u64> {
        let mut keys = self.keys.lock();
        match keys.get_mut(key) {
            Some(state) if now.saturating_duration_since(state.last_emitted) < self.cooldown => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = state.suppressed;
                state.last_emitted = now;
                state.suppressed = 0;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_emitted: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget all keys
    pub fn reset(&self) {
        self.keys.lock().clear();
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_COOLDOWN)
    }
}
