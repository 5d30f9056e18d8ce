//! Upstream data-source contracts used by the backfill path
//!
//! The REST client implements both traits; tests and alternative upstreams
//! provide their own implementations.

use async_trait::async_trait;

use crate::error::MarketResult;
use crate::market::{HistoryInterval, PricePoint, TradeEvent};

/// Pre-aggregated price series for one outcome token
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Ascending points for `token_id` over `interval`. `fidelity` is minutes per sample.
    async fn price_history(
        &self,
        token_id: &str,
        interval: HistoryInterval,
        fidelity: Option<u32>,
    ) -> MarketResult<Vec<PricePoint>>;
}

/// Filter for a single trade-endpoint request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeQuery {
    /// Instrument id stamped onto returned trades
    pub instrument_id: String,
    /// Condition id the endpoint filters by
    pub market: String,
    /// Only trades at or after this unix second
    pub start: Option<i64>,
    /// Only trades strictly before this unix second
    pub end: Option<i64>,
    /// Result cap
    pub limit: u32,
}

impl TradeQuery {
    pub fn recent(instrument_id: &str, market: &str, limit: u32) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            market: market.to_string(),
            start: None,
            end: None,
            limit,
        }
    }

    pub fn since(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }
}

/// Raw trade events for an instrument
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn trades(&self, query: &TradeQuery) -> MarketResult<Vec<TradeEvent>>;
}
