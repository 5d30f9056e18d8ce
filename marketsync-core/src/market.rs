//! Market data structures shared by the live and backfill paths

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a binary contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The side whose price is charted (YES)
    Primary,
    /// The opposite side (NO)
    Complement,
}

impl Outcome {
    /// Map an upstream `outcomeIndex` (0 = primary, 1 = complement)
    pub fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(Outcome::Primary),
            1 => Some(Outcome::Complement),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Primary => "primary",
            Outcome::Complement => "complement",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tradeable contract with two complementary outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Dashboard-facing identifier
    pub id: String,
    /// Key for the trade endpoint (condition id)
    pub condition_id: String,
    /// Token of the primary outcome (history + streaming key)
    pub primary_token: String,
    /// Token of the complement outcome
    pub complement_token: String,
    /// Listing time, when known. Bounds how far back backfill walks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Instrument {
    pub fn new(
        id: impl Into<String>,
        condition_id: impl Into<String>,
        primary_token: impl Into<String>,
        complement_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            condition_id: condition_id.into(),
            primary_token: primary_token.into(),
            complement_token: complement_token.into(),
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Token id for the given outcome
    pub fn token(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Primary => &self.primary_token,
            Outcome::Complement => &self.complement_token,
        }
    }

    /// Age of the instrument at `now`, if the listing time is known
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.created_at.map(|created| now - created)
    }
}

/// A single trade, normalized from any upstream schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Unique across all windows of a backfill
    pub id: String,
    pub instrument_id: String,
    pub outcome: Outcome,
    pub amount: f64,
    /// Price of `outcome` (0.0 - 1.0)
    pub price: f64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Transaction hash or other upstream reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl TradeEvent {
    /// Price of the primary outcome implied by this trade
    pub fn primary_price(&self) -> f64 {
        match self.outcome {
            Outcome::Primary => self.price,
            Outcome::Complement => 1.0 - self.price,
        }
    }
}

/// A sampled point of the reconstructed series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Primary outcome price (0.0 - 1.0)
    pub price: f64,
    /// Complement outcome price. `1 - price` unless both sides were observed.
    pub complement_price: f64,
}

impl PricePoint {
    /// Point whose complement is derived as `1 - price`
    pub fn derived(timestamp: i64, price: f64) -> Self {
        Self {
            timestamp,
            price,
            complement_price: 1.0 - price,
        }
    }

    /// Point where both outcomes were observed at the same timestamp; kept verbatim
    pub fn observed(timestamp: i64, price: f64, complement_price: f64) -> Self {
        Self {
            timestamp,
            price,
            complement_price,
        }
    }

    /// Point built from a complement-side price by mirroring
    pub fn mirrored(timestamp: i64, complement_price: f64) -> Self {
        Self {
            timestamp,
            price: 1.0 - complement_price,
            complement_price,
        }
    }
}

/// Requested history span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesSpan {
    /// The last `Duration` up to now
    Bounded(Duration),
    /// Everything since listing
    Unbounded,
}

impl SeriesSpan {
    pub fn hours(hours: i64) -> Self {
        SeriesSpan::Bounded(Duration::hours(hours))
    }

    pub fn days(days: i64) -> Self {
        SeriesSpan::Bounded(Duration::days(days))
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, SeriesSpan::Bounded(_))
    }

    /// Span length in seconds, `None` when unbounded
    pub fn seconds(&self) -> Option<i64> {
        match self {
            SeriesSpan::Bounded(d) => Some(d.num_seconds()),
            SeriesSpan::Unbounded => None,
        }
    }
}

impl std::str::FromStr for SeriesSpan {
    type Err = String;

    /// Accepts `all`/`max` or a count with an `h`, `d` or `w` suffix, e.g. `6h`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "all" || s == "max" {
            return Ok(SeriesSpan::Unbounded);
        }
        let Some(unit) = s.chars().last() else {
            return Err("Empty span".to_string());
        };
        let count: i64 = s[..s.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| format!("Invalid span: {}", s))?;
        if count <= 0 {
            return Err(format!("Span must be positive: {}", s));
        }
        let duration = match unit {
            'h' => Duration::try_hours(count),
            'd' => Duration::try_days(count),
            'w' => Duration::try_weeks(count),
            _ => return Err(format!("Invalid span unit: {}", s)),
        };
        duration
            .map(SeriesSpan::Bounded)
            .ok_or_else(|| format!("Span out of range: {}", s))
    }
}

/// A historical-series request: span plus an optional resolution hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesRequest {
    pub span: SeriesSpan,
    /// Preferred sample spacing in minutes (upstream "fidelity")
    pub resolution_minutes: Option<u32>,
}

impl SeriesRequest {
    pub fn new(span: SeriesSpan) -> Self {
        Self {
            span,
            resolution_minutes: None,
        }
    }

    pub fn with_resolution(mut self, minutes: u32) -> Self {
        self.resolution_minutes = Some(minutes);
        self
    }
}

/// Interval enum accepted by the primary history endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryInterval {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "max")]
    Max,
}

impl HistoryInterval {
    /// Smallest interval that covers the span
    pub fn for_span(span: SeriesSpan) -> Self {
        let Some(secs) = span.seconds() else {
            return HistoryInterval::Max;
        };
        match secs {
            s if s <= 3_600 => HistoryInterval::OneHour,
            s if s <= 6 * 3_600 => HistoryInterval::SixHours,
            s if s <= 86_400 => HistoryInterval::OneDay,
            s if s <= 7 * 86_400 => HistoryInterval::OneWeek,
            s if s <= 31 * 86_400 => HistoryInterval::OneMonth,
            _ => HistoryInterval::Max,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryInterval::OneHour => "1h",
            HistoryInterval::SixHours => "6h",
            HistoryInterval::OneDay => "1d",
            HistoryInterval::OneWeek => "1w",
            HistoryInterval::OneMonth => "1m",
            HistoryInterval::Max => "max",
        }
    }

    /// Default fidelity (minutes per sample) when no resolution hint is given
    pub fn default_fidelity(&self) -> u32 {
        match self {
            HistoryInterval::OneHour => 1,
            HistoryInterval::SixHours => 5,
            HistoryInterval::OneDay => 15,
            HistoryInterval::OneWeek => 60,
            HistoryInterval::OneMonth => 240,
            HistoryInterval::Max => 1440,
        }
    }
}

impl fmt::Display for HistoryInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
