//! Trade Backfiller
//!
//! Fetches raw trades for an instrument from the trade endpoint. Bounded
//! spans take a single filtered request. Unbounded spans start with the most
//! recent window and walk older fixed-width windows in rate-limited parallel
//! batches when that first window looks truncated.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use marketsync_core::{
    Instrument, LogThrottle, MarketError, MarketResult, SeriesSpan, TradeEvent, TradeQuery,
    TradeSource,
};

/// Configuration for [`TradeBackfiller`]
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Result cap per request
    pub result_cap: u32,
    /// Width of each older window
    pub window: Duration,
    /// Upstream quota: `rate_budget_requests` per `rate_budget_period`
    pub rate_budget_requests: u32,
    pub rate_budget_period: Duration,
    /// Parallel requests per batch
    pub max_concurrency: usize,
    pub window_timeout: Duration,
    /// Hard cap on older windows per backfill
    pub max_windows: usize,
    /// Walk older windows only if the recent window spans less than this share of the instrument's age
    pub recent_coverage_ratio: f64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            result_cap: 500,
            window: Duration::from_secs(90 * 24 * 60 * 60),
            rate_budget_requests: 50,
            rate_budget_period: Duration::from_secs(10),
            max_concurrency: 5,
            window_timeout: Duration::from_secs(10),
            max_windows: 24,
            recent_coverage_ratio: 0.5,
        }
    }
}

impl BackfillConfig {
    /// Requests per batch: the concurrency limit, never above the rate budget
    pub fn batch_size(&self) -> usize {
        self.max_concurrency
            .min(self.rate_budget_requests as usize)
            .max(1)
    }

    /// Pause after a batch of `batch_len` requests that keeps the rate under budget
    pub fn cooldown(&self, batch_len: usize) -> Duration {
        if self.rate_budget_requests == 0 {
            return self.rate_budget_period;
        }
        self.rate_budget_period
            .mul_f64(batch_len as f64 / self.rate_budget_requests as f64)
    }
}

/// Trades gathered by one backfill
#[derive(Debug, Clone, Default)]
pub struct BackfillOutcome {
    /// Unique by id, ascending by timestamp
    pub trades: Vec<TradeEvent>,
    pub windows_requested: usize,
    /// Windows that timed out or errored (each counted as empty)
    pub windows_failed: usize,
}

impl BackfillOutcome {
    /// Every window failed, as opposed to the upstream having no trades
    pub fn all_failed(&self) -> bool {
        self.windows_requested > 0 && self.windows_failed == self.windows_requested
    }
}

/// Accumulates trades, deduplicated by id
#[derive(Default)]
struct TradeSet {
    seen: HashSet<String>,
    trades: Vec<TradeEvent>,
}

impl TradeSet {
    /// Add trades, returning how many ids were new
    fn extend(&mut self, trades: Vec<TradeEvent>) -> usize {
        let before = self.trades.len();
        for trade in trades {
            if self.seen.insert(trade.id.clone()) {
                self.trades.push(trade);
            }
        }
        self.trades.len() - before
    }

    fn into_sorted(mut self) -> Vec<TradeEvent> {
        self.trades.sort_by_key(|t| t.timestamp);
        self.trades
    }
}

/// Rate-limited trade fetcher
pub struct TradeBackfiller {
    source: Arc<dyn TradeSource>,
    config: BackfillConfig,
    log_throttle: LogThrottle,
}

impl TradeBackfiller {
    pub fn new(source: Arc<dyn TradeSource>, config: BackfillConfig) -> Self {
        Self {
            source,
            config,
            log_throttle: LogThrottle::default(),
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Fetch trades for `span` ending at `now` (unix seconds)
    pub async fn backfill(
        &self,
        instrument: &Instrument,
        span: SeriesSpan,
        now: i64,
    ) -> BackfillOutcome {
        match span.seconds() {
            Some(secs) => self.backfill_bounded(instrument, now - secs).await,
            None => self.backfill_unbounded(instrument, now).await,
        }
    }

    async fn backfill_bounded(&self, instrument: &Instrument, start: i64) -> BackfillOutcome {
        let query = TradeQuery::recent(&instrument.id, &instrument.condition_id, self.config.result_cap)
            .since(start);

        let (trades, failed) = match self.fetch_window(&query).await {
            Ok(trades) => (trades, 0),
            Err(_) => (Vec::new(), 1),
        };

        let mut set = TradeSet::default();
        set.extend(trades);
        let outcome = BackfillOutcome {
            trades: set.into_sorted(),
            windows_requested: 1,
            windows_failed: failed,
        };
        debug!(
            "[Backfill] {} bounded since {}: {} trades",
            instrument.id,
            start,
            outcome.trades.len()
        );
        outcome
    }

    async fn backfill_unbounded(&self, instrument: &Instrument, now: i64) -> BackfillOutcome {
        let recent_query =
            TradeQuery::recent(&instrument.id, &instrument.condition_id, self.config.result_cap);
        let mut outcome = BackfillOutcome {
            windows_requested: 1,
            ..Default::default()
        };

        let recent = match self.fetch_window(&recent_query).await {
            Ok(trades) => trades,
            Err(_) => {
                outcome.windows_failed = 1;
                return outcome;
            }
        };

        let capped = recent.len() >= self.config.result_cap as usize;
        let oldest = recent.iter().map(|t| t.timestamp).min();
        let mut set = TradeSet::default();
        set.extend(recent);

        let Some(oldest) = oldest.filter(|_| capped) else {
            outcome.trades = set.into_sorted();
            return outcome;
        };

        let created_at = instrument.created_at.map(|c| c.timestamp());
        if let Some(created) = created_at {
            let age = (now - created).max(0) as f64;
            let observed = (now - oldest).max(0) as f64;
            if observed >= age * self.config.recent_coverage_ratio {
                debug!(
                    "[Backfill] {} recent window covers {:.0}% of its age, not walking back",
                    instrument.id,
                    observed / age.max(1.0) * 100.0
                );
                outcome.trades = set.into_sorted();
                return outcome;
            }
        }

        let windows = self.older_windows(instrument, oldest, created_at);
        info!(
            "[Backfill] {} recent window capped at {} trades, walking {} older windows",
            instrument.id,
            self.config.result_cap,
            windows.len()
        );

        let batch_size = self.config.batch_size();
        let mut batches = windows.chunks(batch_size).peekable();
        while let Some(batch) = batches.next() {
            let results = join_all(batch.iter().map(|query| self.fetch_window(query))).await;
            outcome.windows_requested += batch.len();

            let mut added = 0;
            for result in results {
                match result {
                    Ok(trades) => added += set.extend(trades),
                    Err(_) => outcome.windows_failed += 1,
                }
            }
            debug!(
                "[Backfill] {} batch of {} windows added {} trades",
                instrument.id,
                batch.len(),
                added
            );

            if added == 0 {
                debug!("[Backfill] {} batch added nothing new, stopping", instrument.id);
                break;
            }
            if batches.peek().is_some() {
                tokio::time::sleep(self.config.cooldown(batch.len())).await;
            }
        }

        outcome.trades = set.into_sorted();
        info!(
            "[Backfill] {} complete: {} trades from {} windows ({} failed)",
            instrument.id,
            outcome.trades.len(),
            outcome.windows_requested,
            outcome.windows_failed
        );
        outcome
    }

    /// Older windows `[end - width, end)` walking back from `oldest`,
    /// stopping at the creation time or the window cap
    fn older_windows(
        &self,
        instrument: &Instrument,
        oldest: i64,
        created_at: Option<i64>,
    ) -> Vec<TradeQuery> {
        let width = self.config.window.as_secs().max(1) as i64;
        let mut windows = Vec::new();
        // +1 so trades at the oldest second are fetched again and deduplicated
        let mut end = oldest + 1;

        while windows.len() < self.config.max_windows {
            if created_at.is_some_and(|created| end <= created) {
                break;
            }
            let start = match created_at {
                Some(created) => (end - width).max(created),
                None => end - width,
            };
            windows.push(
                TradeQuery::recent(&instrument.id, &instrument.condition_id, self.config.result_cap)
                    .since(start)
                    .until(end),
            );
            end = start;
        }
        windows
    }

    /// One request under the per-window timeout
    async fn fetch_window(&self, query: &TradeQuery) -> MarketResult<Vec<TradeEvent>> {
        let result = match tokio::time::timeout(self.config.window_timeout, self.source.trades(query)).await {
            Ok(result) => result,
            Err(_) => Err(MarketError::network(format!(
                "trade window timed out after {:?}",
                self.config.window_timeout
            ))),
        };

        if let Err(e) = &result {
            if let Some(suppressed) = self.log_throttle.check(&e.log_key()) {
                warn!(
                    "[Backfill] Window {:?}..{:?} for {} failed: {} ({} similar suppressed)",
                    query.start, query.end, query.market, e, suppressed
                );
            }
        }
        result
    }
}

impl std::fmt::Debug for TradeBackfiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeBackfiller")
            .field("config", &self.config)
            .finish()
    }
}
