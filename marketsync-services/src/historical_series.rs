//! Historical Series Builder
//!
//! Reconstructs a price series for an instrument. The pre-aggregated history
//! endpoint is tried first; when its coverage falls short the builder
//! backfills raw trades, bucketizes them, and merges the two.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use marketsync_core::{
    HistoryInterval, HistorySource, Instrument, LogThrottle, MarketError, MarketResult,
    PricePoint, SeriesRequest, SeriesSpan,
};

use crate::series_bucketizer::{downsample, merge_by_hour, merge_with_separation, SeriesBucketizer};
use crate::trade_backfiller::TradeBackfiller;

/// Configuration for [`HistoricalSeriesBuilder`]
#[derive(Debug, Clone)]
pub struct SeriesConfig {
    /// Max points returned for bounded spans
    pub point_budget: usize,
    /// Bounded spans: the primary series must cover this share of the span
    pub bounded_coverage_ratio: f64,
    /// Unbounded spans: the primary series must cover this much history,
    /// capped by the instrument's age when known
    pub unbounded_min_coverage: Duration,
    /// Fewer bucketized points than this triggers trade sampling
    pub min_points: usize,
    /// Expected points per backfilled trade; fewer also triggers sampling
    pub min_points_per_trade: f64,
    /// Sampled trades closer than this to an existing point are dropped
    pub supplement_separation: Duration,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            point_budget: 1000,
            bounded_coverage_ratio: 0.8,
            unbounded_min_coverage: Duration::from_secs(35 * 24 * 60 * 60),
            min_points: 50,
            min_points_per_trade: 0.1,
            supplement_separation: Duration::from_secs(60),
        }
    }
}

/// Seconds between the first and last point
fn covered_span(points: &[PricePoint]) -> i64 {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => last.timestamp - first.timestamp,
        _ => 0,
    }
}

/// Orchestrates the primary history source and the trade fallback
pub struct HistoricalSeriesBuilder {
    history: Arc<dyn HistorySource>,
    backfiller: TradeBackfiller,
    bucketizer: SeriesBucketizer,
    config: SeriesConfig,
    log_throttle: LogThrottle,
}

impl HistoricalSeriesBuilder {
    pub fn new(
        history: Arc<dyn HistorySource>,
        backfiller: TradeBackfiller,
        config: SeriesConfig,
    ) -> Self {
        Self {
            history,
            backfiller,
            bucketizer: SeriesBucketizer::new(config.point_budget),
            config,
            log_throttle: LogThrottle::default(),
        }
    }

    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    /// Build the series for `request` ending now
    pub async fn build(
        &self,
        instrument: &Instrument,
        request: SeriesRequest,
    ) -> MarketResult<Vec<PricePoint>> {
        self.build_at(instrument, request, Utc::now()).await
    }

    /// Build the series for `request` ending at `now`
    ///
    /// Returns an empty series when no source has data, and
    /// `MarketError::SourcesExhausted` only when every source failed.
    #[instrument(skip(self, instrument), fields(instrument_id = %instrument.id))]
    pub async fn build_at(
        &self,
        instrument: &Instrument,
        request: SeriesRequest,
        now: DateTime<Utc>,
    ) -> MarketResult<Vec<PricePoint>> {
        let span = request.span;
        let interval = HistoryInterval::for_span(span);
        let window_start = span.seconds().map(|secs| now.timestamp() - secs);

        let primary = self
            .history
            .price_history(&instrument.primary_token, interval, request.resolution_minutes)
            .await;

        let (partial, primary_error) = match primary {
            Ok(mut points) => {
                if let Some(start) = window_start {
                    points.retain(|p| p.timestamp >= start);
                }
                if self.is_complete(&points, instrument, span, now) {
                    debug!(
                        "Primary history complete for {} ({} points)",
                        instrument.id,
                        points.len()
                    );
                    return Ok(self.finish(points, span));
                }
                debug!(
                    "Primary history for {} covers {}s, backfilling",
                    instrument.id,
                    covered_span(&points)
                );
                (points, None)
            }
            Err(e) => {
                if let Some(suppressed) = self.log_throttle.check(&e.log_key()) {
                    warn!(
                        "Primary history failed for {}: {} ({} similar suppressed)",
                        instrument.id, e, suppressed
                    );
                }
                (Vec::new(), Some(e))
            }
        };

        let backfill = self.backfiller.backfill(instrument, span, now.timestamp()).await;

        if let Some(primary_error) = primary_error {
            if backfill.all_failed() {
                return Err(MarketError::exhausted(format!(
                    "{}: primary history ({}) and {} trade windows",
                    instrument.id, primary_error, backfill.windows_failed
                )));
            }
        }

        let trades = backfill.trades;
        let bucketized = self.bucketizer.bucketize(&trades, span.seconds());
        let mut merged = merge_by_hour(&partial, &bucketized);

        let wanted = self.wanted_points(trades.len());
        if merged.len() < wanted && trades.len() > merged.len() {
            // never every trade
            let stride = trades.len().div_ceil(wanted).max(2);
            let samples = self.bucketizer.sample_trades(&trades, stride);
            let before = merged.len();
            merged = merge_with_separation(
                &merged,
                &samples,
                self.config.supplement_separation.as_secs() as i64,
            );
            debug!(
                "Supplemented {} with {} sampled trades (stride {})",
                instrument.id,
                merged.len() - before,
                stride
            );
        }

        info!(
            "Built {} series for {}: {} points ({} primary, {} trades)",
            interval,
            instrument.id,
            merged.len(),
            partial.len(),
            trades.len()
        );
        Ok(self.finish(merged, span))
    }

    /// Point count the output should reach given how many trades were found
    fn wanted_points(&self, trade_count: usize) -> usize {
        let by_volume = (trade_count as f64 * self.config.min_points_per_trade).ceil() as usize;
        self.config
            .min_points
            .max(by_volume)
            .min(self.config.point_budget)
            .max(1)
    }

    fn is_complete(
        &self,
        points: &[PricePoint],
        instrument: &Instrument,
        span: SeriesSpan,
        now: DateTime<Utc>,
    ) -> bool {
        if points.is_empty() {
            return false;
        }
        let covered = covered_span(points) as f64;
        let required = match span {
            SeriesSpan::Bounded(d) => d.num_seconds() as f64 * self.config.bounded_coverage_ratio,
            SeriesSpan::Unbounded => {
                let min_coverage = self.config.unbounded_min_coverage.as_secs() as f64;
                match instrument.age(now) {
                    Some(age) => min_coverage
                        .min(age.num_seconds().max(0) as f64 * self.config.bounded_coverage_ratio),
                    None => min_coverage,
                }
            }
        };
        covered >= required
    }

    fn finish(&self, points: Vec<PricePoint>, span: SeriesSpan) -> Vec<PricePoint> {
        if span.is_bounded() {
            downsample(&points, self.config.point_budget)
        } else {
            points
        }
    }
}

impl std::fmt::Debug for HistoricalSeriesBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalSeriesBuilder")
            .field("config", &self.config)
            .field("backfiller", &self.backfiller)
            .finish()
    }
}
