//! Coalescing buffer for live updates
//!
//! Rapid stream updates are collected and handed to a flush callback in
//! batches: when `max_items` are pending, or every `flush_interval`,
//! whichever comes first.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use marketsync_core::{MarketError, MarketResult};

/// Batches items for a flush callback running on its own task
#[derive(Debug)]
pub struct UpdateBuffer<T> {
    tx: mpsc::UnboundedSender<T>,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> UpdateBuffer<T> {
    /// Spawn the buffer task. Must be called inside a tokio runtime.
    ///
    /// A zero `flush_interval` is a configuration error.
    pub fn spawn<F>(max_items: usize, flush_interval: Duration, mut flush: F) -> MarketResult<Self>
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        if flush_interval.is_zero() {
            return Err(MarketError::configuration("flush interval must be non-zero"));
        }
        let max_items = max_items.max(1);
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        let handle = tokio::spawn(async move {
            let mut pending: Vec<T> = Vec::with_capacity(max_items);
            let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    item = rx.recv() => match item {
                        Some(item) => {
                            pending.push(item);
                            if pending.len() >= max_items {
                                flush(std::mem::take(&mut pending));
                            }
                        }
                        None => {
                            if !pending.is_empty() {
                                flush(std::mem::take(&mut pending));
                            }
                            debug!("Update buffer closed");
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        if !pending.is_empty() {
                            flush(std::mem::take(&mut pending));
                        }
                    }
                }
            }
        });

        Ok(Self { tx, handle })
    }

    /// Queue an item. Returns `false` once the buffer task has stopped.
    pub fn push(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }

    /// Stop accepting items and wait for the final flush
    pub async fn close(self) {
        let Self { tx, handle } = self;
        drop(tx);
        let _ = handle.await;
    }
}
