//! Series Bucketizer
//!
//! Quantizes raw trades into fixed-width time buckets and turns the buckets
//! into a price series for the primary outcome, deriving the complement.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use marketsync_core::{Outcome, PricePoint, TradeEvent};

/// Bucket width table: `(span at most, width)` in seconds
const WIDTH_TABLE: [(i64, i64); 6] = [
    (6 * 60, 5),
    (60 * 60, 60),
    (6 * 60 * 60, 5 * 60),
    (24 * 60 * 60, 15 * 60),
    (7 * 24 * 60 * 60, 60 * 60),
    (30 * 24 * 60 * 60, 4 * 60 * 60),
];

/// Width for spans longer than the last table entry
const WIDEST_BUCKET: i64 = 12 * 60 * 60;

/// Bucket width in seconds for a span in seconds. Non-decreasing in `span`.
pub fn bucket_width(span_secs: i64) -> i64 {
    WIDTH_TABLE
        .iter()
        .find(|(max_span, _)| span_secs <= *max_span)
        .map(|(_, width)| *width)
        .unwrap_or(WIDEST_BUCKET)
}

/// Start of the bucket containing `timestamp`
pub fn bucket_start(timestamp: i64, width: i64) -> i64 {
    timestamp.div_euclid(width) * width
}

/// Seconds between the oldest and newest trade
pub fn observed_span(trades: &[TradeEvent]) -> i64 {
    let min = trades.iter().map(|t| t.timestamp).min();
    let max = trades.iter().map(|t| t.timestamp).max();
    match (min, max) {
        (Some(min), Some(max)) => max - min,
        _ => 0,
    }
}

/// Builds price series from trades
#[derive(Debug, Clone, Copy)]
pub struct SeriesBucketizer {
    point_budget: usize,
}

impl SeriesBucketizer {
    pub fn new(point_budget: usize) -> Self {
        Self { point_budget }
    }

    pub fn point_budget(&self) -> usize {
        self.point_budget
    }

    /// Bucketize with the width picked from the narrower of the observed
    /// and requested spans (`None` = unbounded request)
    pub fn bucketize(&self, trades: &[TradeEvent], requested_span: Option<i64>) -> Vec<PricePoint> {
        let observed = observed_span(trades);
        let span = match requested_span {
            Some(requested) => observed.min(requested),
            None => observed,
        };
        self.bucketize_with_width(trades, bucket_width(span))
    }

    /// Bucketize with an explicit width in seconds
    pub fn bucketize_with_width(&self, trades: &[TradeEvent], width: i64) -> Vec<PricePoint> {
        let width = width.max(1);

        // bucket start -> (trade timestamp, price), chronologically last wins
        let mut primary: BTreeMap<i64, (i64, f64)> = BTreeMap::new();
        let mut complement: BTreeMap<i64, (i64, f64)> = BTreeMap::new();

        for trade in trades {
            let buckets = match trade.outcome {
                Outcome::Primary => &mut primary,
                Outcome::Complement => &mut complement,
            };
            let key = bucket_start(trade.timestamp, width);
            let slot = buckets.entry(key).or_insert((trade.timestamp, trade.price));
            if trade.timestamp >= slot.0 {
                *slot = (trade.timestamp, trade.price);
            }
        }

        let timeline: BTreeSet<i64> =
            primary.keys().chain(complement.keys()).copied().collect();

        let points: Vec<PricePoint> = timeline
            .into_iter()
            .filter_map(|ts| match (primary.get(&ts), complement.get(&ts)) {
                (Some((_, price)), _) => Some(PricePoint::derived(ts, *price)),
                (None, Some((_, complement_price))) => {
                    Some(PricePoint::mirrored(ts, *complement_price))
                }
                (None, None) => None,
            })
            .collect();

        downsample(&points, self.point_budget)
    }

    /// Individually sampled trades at a fixed stride
    ///
    /// Primary and complement trades sharing a timestamp become one point
    /// with both prices kept as observed.
    pub fn sample_trades(&self, trades: &[TradeEvent], stride: usize) -> Vec<PricePoint> {
        let stride = stride.max(1);
        let mut sorted: Vec<&TradeEvent> = trades.iter().collect();
        sorted.sort_by_key(|t| t.timestamp);

        let mut by_ts: BTreeMap<i64, (Option<f64>, Option<f64>)> = BTreeMap::new();
        for trade in sorted.into_iter().step_by(stride) {
            let slot = by_ts.entry(trade.timestamp).or_insert((None, None));
            match trade.outcome {
                Outcome::Primary => slot.0 = Some(trade.price),
                Outcome::Complement => slot.1 = Some(trade.price),
            }
        }

        by_ts
            .into_iter()
            .filter_map(|(ts, prices)| match prices {
                (Some(p), Some(c)) => Some(PricePoint::observed(ts, p, c)),
                (Some(p), None) => Some(PricePoint::derived(ts, p)),
                (None, Some(c)) => Some(PricePoint::mirrored(ts, c)),
                (None, None) => None,
            })
            .collect()
    }
}

/// Uniformly stride `points` down to at most `budget`, keeping first and last
///
/// Idempotent: the output never exceeds `budget`, so a second pass is a copy.
pub fn downsample(points: &[PricePoint], budget: usize) -> Vec<PricePoint> {
    let n = points.len();
    if n <= budget {
        return points.to_vec();
    }
    match budget {
        0 => Vec::new(),
        1 => points[n - 1..].to_vec(),
        _ => (0..budget)
            .map(|i| points[i * (n - 1) / (budget - 1)])
            .collect(),
    }
}

/// Union of two ascending series keyed by hour; `preferred` wins any hour both cover
pub fn merge_by_hour(fallback: &[PricePoint], preferred: &[PricePoint]) -> Vec<PricePoint> {
    let preferred_hours: HashSet<i64> = preferred
        .iter()
        .map(|p| p.timestamp.div_euclid(3600))
        .collect();

    let mut merged: BTreeMap<i64, PricePoint> = fallback
        .iter()
        .filter(|p| !preferred_hours.contains(&p.timestamp.div_euclid(3600)))
        .map(|p| (p.timestamp, *p))
        .collect();
    for point in preferred {
        merged.insert(point.timestamp, *point);
    }
    merged.into_values().collect()
}

/// Add `extra` points that are at least `min_separation` seconds from every existing point
pub fn merge_with_separation(
    base: &[PricePoint],
    extra: &[PricePoint],
    min_separation: i64,
) -> Vec<PricePoint> {
    let mut merged: BTreeMap<i64, PricePoint> = base.iter().map(|p| (p.timestamp, *p)).collect();

    for point in extra {
        let lo = point.timestamp.saturating_sub(min_separation - 1);
        let hi = point.timestamp.saturating_add(min_separation - 1);
        let crowded = min_separation > 0 && merged.range(lo..=hi).next().is_some();
        if !crowded && !merged.contains_key(&point.timestamp) {
            merged.insert(point.timestamp, *point);
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(id: &str, outcome: Outcome, price: f64, timestamp: i64) -> TradeEvent {
        TradeEvent {
            id: id.to_string(),
            instrument_id: "inst".to_string(),
            outcome,
            amount: 10.0,
            price,
            timestamp,
            origin: None,
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_width_table() {
        assert_eq!(bucket_width(5 * 60), 5);
        assert_eq!(bucket_width(6 * 60), 5);
        assert_eq!(bucket_width(30 * 60), 60);
        assert_eq!(bucket_width(6 * 3600), 300);
        assert_eq!(bucket_width(86_400), 900);
        assert_eq!(bucket_width(3 * 86_400), 3600);
        assert_eq!(bucket_width(20 * 86_400), 4 * 3600);
        assert_eq!(bucket_width(365 * 86_400), 12 * 3600);
    }

    #[test]
    fn test_width_non_decreasing_in_span() {
        let mut previous = 0;
        for span in (0..=60 * 86_400).step_by(997) {
            let width = bucket_width(span);
            assert!(width >= previous);
            previous = width;
        }
    }

    #[test]
    fn test_one_day_example() {
        let t0 = 1_700_000_100;
        let trades = vec![
            trade("a", Outcome::Primary, 0.40, t0),
            trade("b", Outcome::Primary, 0.55, t0 + 30 * 60),
        ];

        let points = SeriesBucketizer::new(1000).bucketize_with_width(&trades, 900);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, bucket_start(t0, 900));
        assert_close(points[0].price, 0.40);
        assert_close(points[0].complement_price, 0.60);
        assert_eq!(points[1].timestamp, bucket_start(t0 + 1800, 900));
        assert_close(points[1].price, 0.55);
        assert_close(points[1].complement_price, 0.45);
    }

    #[test]
    fn test_last_price_in_bucket_wins() {
        let trades = vec![
            trade("late", Outcome::Primary, 0.7, 1_000_050),
            trade("early", Outcome::Primary, 0.3, 1_000_010),
        ];
        let points = SeriesBucketizer::new(1000).bucketize_with_width(&trades, 3600);
        assert_eq!(points.len(), 1);
        assert_close(points[0].price, 0.7);
    }

    #[test]
    fn test_complement_only_is_mirrored() {
        let trades: Vec<_> = (0..20)
            .map(|i| {
                trade(
                    &format!("c{}", i),
                    Outcome::Complement,
                    0.2 + i as f64 * 0.03,
                    1_700_000_000 + i * 3600,
                )
            })
            .collect();

        let points = SeriesBucketizer::new(1000).bucketize(&trades, Some(7 * 86_400));

        assert_eq!(points.len(), 20);
        for (point, trade) in points.iter().zip(&trades) {
            assert_close(point.complement_price, 1.0 - point.price);
            assert_close(point.price, 1.0 - trade.price);
        }
    }

    #[test]
    fn test_primary_bucket_preferred_over_complement() {
        let trades = vec![
            trade("p", Outcome::Primary, 0.61, 1_700_000_000),
            trade("c", Outcome::Complement, 0.45, 1_700_000_010),
            trade("c2", Outcome::Complement, 0.30, 1_700_003_600),
        ];
        let points = SeriesBucketizer::new(1000).bucketize_with_width(&trades, 3600);

        assert_eq!(points.len(), 2);
        assert_close(points[0].price, 0.61);
        assert_close(points[0].complement_price, 0.39);
        assert_close(points[1].price, 0.70);
    }

    #[test]
    fn test_output_strictly_ascending() {
        let trades: Vec<_> = (0..500)
            .map(|i| trade(&i.to_string(), Outcome::Primary, 0.5, 1_700_000_000 + (i * 7919) % 86_400))
            .collect();
        let points = SeriesBucketizer::new(1000).bucketize(&trades, Some(86_400));
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_empty_trades_give_empty_series() {
        assert!(SeriesBucketizer::new(1000).bucketize(&[], None).is_empty());
    }

    #[test]
    fn test_downsample_keeps_endpoints_and_is_idempotent() {
        let points: Vec<_> = (0..2500).map(|i| PricePoint::derived(i, 0.5)).collect();

        let once = downsample(&points, 1000);
        let twice = downsample(&once, 1000);

        assert_eq!(once.len(), 1000);
        assert_eq!(once.first().unwrap().timestamp, 0);
        assert_eq!(once.last().unwrap().timestamp, 2499);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_downsample_edge_budgets() {
        let points: Vec<_> = (0..5).map(|i| PricePoint::derived(i, 0.5)).collect();
        assert!(downsample(&points, 0).is_empty());
        assert_eq!(downsample(&points, 1), vec![points[4]]);
        assert_eq!(downsample(&points, 10), points);
    }

    #[test]
    fn test_merge_by_hour_prefers_backfilled_point() {
        let primary = vec![
            PricePoint::derived(3600, 0.10),
            PricePoint::derived(7200 + 60, 0.20),
        ];
        let backfilled = vec![PricePoint::derived(7200 + 900, 0.25)];

        let merged = merge_by_hour(&primary, &backfilled);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].timestamp, 3600);
        assert_eq!(merged[1].timestamp, 7200 + 900);
        assert_close(merged[1].price, 0.25);
    }

    #[test]
    fn test_sampled_trades_keep_observed_pairs() {
        let trades = vec![
            trade("p", Outcome::Primary, 0.6, 100),
            trade("c", Outcome::Complement, 0.42, 100),
            trade("q", Outcome::Primary, 0.5, 200),
        ];
        let samples = SeriesBucketizer::new(1000).sample_trades(&trades, 1);

        assert_eq!(samples.len(), 2);
        assert_close(samples[0].price, 0.6);
        assert_close(samples[0].complement_price, 0.42);
        assert_close(samples[1].complement_price, 0.5);
    }

    #[test]
    fn test_merge_with_separation_filters_crowded_samples() {
        let base = vec![PricePoint::derived(1000, 0.5)];
        let extra = vec![
            PricePoint::derived(1030, 0.6),
            PricePoint::derived(1100, 0.7),
            PricePoint::derived(1120, 0.8),
        ];

        let merged = merge_with_separation(&base, &extra, 60);

        let ts: Vec<_> = merged.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![1000, 1100]);
    }
}
