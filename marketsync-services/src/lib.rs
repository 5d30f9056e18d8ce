//! Market data synchronization services
//!
//! Historical series reconstruction (primary history with a trade backfill
//! fallback), live-update buffering, and the [`MarketDataSync`] facade that
//! combines both with the streaming connection.

pub mod config;
pub mod historical_series;
pub mod market_data;
pub mod series_bucketizer;
pub mod series_view;
pub mod trade_backfiller;
pub mod update_buffer;

pub use config::SyncConfig;
pub use historical_series::{HistoricalSeriesBuilder, SeriesConfig};
pub use market_data::MarketDataSync;
pub use series_bucketizer::{
    bucket_width, downsample, merge_by_hour, merge_with_separation, SeriesBucketizer,
};
pub use series_view::{SeriesTicket, SeriesView};
pub use trade_backfiller::{BackfillConfig, BackfillOutcome, TradeBackfiller};
pub use update_buffer::UpdateBuffer;
