//! Subscription registry for the streaming connection
//!
//! Maps channel keys to reference-counted callback sets. The first callback
//! on a channel sends an upstream subscribe frame, the last one to leave sends
//! the unsubscribe. The registry outlives individual sockets: on reconnect the
//! manager swaps the socket behind [`Outbound`] and replays every channel.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error};

use marketsync_core::{ControlFrame, StreamMessage};

/// Subscriber callback
pub type StreamCallback = Arc<dyn Fn(&StreamMessage) + Send + Sync>;

/// Writer for the current socket, if any
#[derive(Debug, Default)]
pub struct Outbound {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the writer of a freshly opened socket
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.tx.lock() = Some(tx);
    }

    /// Remove the writer. Dropping the returned sender closes the socket.
    pub fn detach(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.tx.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Write a frame if a socket is attached. Returns whether it was handed off.
    pub fn send(&self, frame: String) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

/// Reference-counted per-channel callback sets
pub struct SubscriptionRegistry {
    channels: DashMap<String, HashMap<u64, StreamCallback>>,
    next_id: AtomicU64,
    outbound: Arc<Outbound>,
}

impl SubscriptionRegistry {
    pub fn new(outbound: Arc<Outbound>) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            outbound,
        }
    }

    /// Register a callback on a channel
    ///
    /// Returns the handle that removes exactly this registration.
    pub fn subscribe(self: &Arc<Self>, channel: &str, callback: StreamCallback) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(id, callback);
                debug!(
                    "[Stream] Added subscriber to {} (refs: {})",
                    channel,
                    entry.get().len()
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(HashMap::from([(id, callback)]));
                // Sent under the entry lock so a racing last-unsubscribe cannot reorder frames
                let sent = self.outbound.send(
                    ControlFrame::Subscribe {
                        channel: channel.to_string(),
                    }
                    .to_json(),
                );
                debug!("[Stream] New channel {} (subscribe sent: {})", channel, sent);
            }
        }

        Unsubscribe {
            registry: Arc::downgrade(self),
            channel: channel.to_string(),
            id,
        }
    }

    fn remove(&self, channel: &str, id: u64) -> bool {
        let Entry::Occupied(mut entry) = self.channels.entry(channel.to_string()) else {
            return false;
        };
        if entry.get_mut().remove(&id).is_none() {
            return false;
        }
        if entry.get().is_empty() {
            entry.remove();
            let sent = self.outbound.send(
                ControlFrame::Unsubscribe {
                    channel: channel.to_string(),
                }
                .to_json(),
            );
            debug!("[Stream] Dropped channel {} (unsubscribe sent: {})", channel, sent);
        }
        true
    }

    /// Number of callbacks registered on a channel
    pub fn ref_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|c| c.len()).unwrap_or(0)
    }

    /// All channels with at least one callback
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send a subscribe frame for every registered channel. Returns how many were sent.
    pub fn resubscribe_all(&self) -> usize {
        self.channels()
            .into_iter()
            .filter(|channel| {
                self.outbound.send(
                    ControlFrame::Subscribe {
                        channel: channel.clone(),
                    }
                    .to_json(),
                )
            })
            .count()
    }

    /// Invoke every callback on the message's channel. Returns how many ran.
    pub fn dispatch(&self, message: &StreamMessage) -> usize {
        let callbacks: Vec<StreamCallback> = match self.channels.get(&message.channel) {
            Some(entry) => entry.values().cloned().collect(),
            None => return 0,
        };

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!("[Stream] Subscriber callback panicked on {}", message.channel);
            }
        }
        callbacks.len()
    }

    /// Drop every registration without sending unsubscribe frames
    pub fn clear(&self) {
        self.channels.clear();
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// Handle returned by [`SubscriptionRegistry::subscribe`]
#[derive(Debug)]
pub struct Unsubscribe {
    registry: Weak<SubscriptionRegistry>,
    channel: String,
    id: u64,
}

impl Unsubscribe {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove this registration. Returns `false` if it was already gone
    /// (e.g. cleared by `disconnect()`).
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.channel, self.id),
            None => false,
        }
    }
}
