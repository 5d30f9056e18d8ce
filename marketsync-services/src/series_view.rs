//! Stale-result guard for series requests
//!
//! A view (one chart) issues a ticket per request. Only the result for the
//! most recently issued ticket is stored; a slower earlier request that
//! finishes later is discarded.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use marketsync_core::{PricePoint, SeriesRequest};

/// Sequence-numbered request key captured when a request is issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTicket {
    pub instrument_id: String,
    pub request: SeriesRequest,
    pub seq: u64,
}

#[derive(Debug, Default)]
struct ViewState {
    active: Option<SeriesTicket>,
    series: Option<(SeriesTicket, Arc<Vec<PricePoint>>)>,
}

/// Holds the latest series for one consumer
#[derive(Debug, Default)]
pub struct SeriesView {
    next_seq: AtomicU64,
    state: Mutex<ViewState>,
}

impl SeriesView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request; it becomes the active one
    pub fn issue(&self, instrument_id: &str, request: SeriesRequest) -> SeriesTicket {
        let ticket = SeriesTicket {
            instrument_id: instrument_id.to_string(),
            request,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.state.lock().active = Some(ticket.clone());
        ticket
    }

    pub fn is_active(&self, ticket: &SeriesTicket) -> bool {
        self.state.lock().active.as_ref() == Some(ticket)
    }

    /// Store `series` if `ticket` is still the active request. Returns whether it was stored.
    pub fn complete(&self, ticket: &SeriesTicket, series: Vec<PricePoint>) -> bool {
        let mut state = self.state.lock();
        if state.active.as_ref() != Some(ticket) {
            debug!(
                "Discarding superseded series for {} (seq {})",
                ticket.instrument_id, ticket.seq
            );
            return false;
        }
        state.series = Some((ticket.clone(), Arc::new(series)));
        true
    }

    /// Latest stored series with the ticket that produced it
    pub fn current(&self) -> Option<(SeriesTicket, Arc<Vec<PricePoint>>)> {
        self.state.lock().series.clone()
    }
}
