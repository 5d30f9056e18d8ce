//! Market data sync driver
//!
//! Fetches the historical series for one instrument, then tails its live
//! price channel until Ctrl+C.
//!
//! ```text
//! marketsync <condition_id> <primary_token> <complement_token> [span]
//! ```

use anyhow::{bail, Context};
use chrono::{TimeZone, Utc};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marketsync_core::{Instrument, Outcome, SeriesRequest, SeriesSpan, StreamTopic};
use marketsync_services::{MarketDataSync, SyncConfig};

const USAGE: &str = "usage: marketsync <condition_id> <primary_token> <complement_token> [span]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marketsync=debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!(USAGE);
    }
    let span: SeriesSpan = match args.get(3) {
        Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
        None => SeriesSpan::days(1),
    };
    let instrument = Instrument::new(&args[0], &args[0], &args[1], &args[2]);

    let config = SyncConfig::from_env().context("Failed to load configuration")?;
    let has_credentials = config.stream.credentials.is_some();
    let sync = MarketDataSync::new(config).context("Failed to build market data sync")?;

    // Historical series
    let series = sync
        .historical_series(&instrument, SeriesRequest::new(span))
        .await
        .context("Failed to build historical series")?;

    match (series.first(), series.last()) {
        (Some(first), Some(last)) => info!(
            "{} points from {} to {}, last price {:.4}",
            series.len(),
            format_ts(first.timestamp),
            format_ts(last.timestamp),
            last.price
        ),
        _ => info!("No history available for {}", instrument.id),
    }

    // Live updates
    if !has_credentials {
        warn!("POLY_API_KEY not set, skipping live updates");
        return Ok(());
    }

    sync.connect()?;
    let subscription = sync.subscribe_live_buffered(
        &instrument,
        Outcome::Primary,
        StreamTopic::Price,
        50,
        Duration::from_millis(500),
        |batch| {
            if let Some(latest) = batch.last() {
                info!(
                    "{} update(s) on {}, latest: {}",
                    batch.len(),
                    latest.channel,
                    serde_json::to_string(&latest.payload).unwrap_or_default()
                );
            }
        },
    )?;

    info!("Tailing {}, press Ctrl+C to stop", subscription.channel());
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    subscription.unsubscribe();
    sync.disconnect();
    Ok(())
}

fn format_ts(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}
