//! Core types for the market-data synchronization core
//!
//! This crate defines the data structures shared by the live-update path
//! (streaming connection) and the backfill path (historical series), along
//! with the error taxonomy both paths report through.

pub mod error;
pub mod market;
pub mod source;
pub mod throttle;
pub mod websocket;

pub use error::{MarketError, MarketResult};
pub use market::{
    HistoryInterval, Instrument, Outcome, PricePoint, SeriesRequest, SeriesSpan, TradeEvent,
};
pub use source::{HistorySource, TradeQuery, TradeSource};
pub use throttle::{LogThrottle, DEFAULT_LOG_COOLDOWN};
pub use websocket::{channel_key, ConnectionState, ControlFrame, StreamMessage, StreamTopic};
