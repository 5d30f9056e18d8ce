//! Market data sync facade
//!
//! Ties the backfill path (historical series) and the live path (streaming
//! connection) together behind one handle.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use marketsync_core::{
    channel_key, HistorySource, Instrument, MarketResult, Outcome, PricePoint, SeriesRequest,
    StreamMessage, StreamTopic, TradeSource,
};
use marketsync_polymarket::{ConnectionManager, PolymarketClient, Unsubscribe};

use crate::config::SyncConfig;
use crate::historical_series::HistoricalSeriesBuilder;
use crate::series_view::{SeriesTicket, SeriesView};
use crate::trade_backfiller::TradeBackfiller;
use crate::update_buffer::UpdateBuffer;

/// Entry point for callers that need both historical and live data
#[derive(Clone)]
pub struct MarketDataSync {
    series: Arc<HistoricalSeriesBuilder>,
    view: Arc<SeriesView>,
    stream: ConnectionManager,
}

impl MarketDataSync {
    /// Build against the live Polymarket endpoints
    pub fn new(config: SyncConfig) -> MarketResult<Self> {
        let client = Arc::new(PolymarketClient::new(config.client)?);
        let history: Arc<dyn HistorySource> = client.clone();
        let trades: Arc<dyn TradeSource> = client;

        let backfiller = TradeBackfiller::new(trades, config.backfill);
        let series = HistoricalSeriesBuilder::new(history, backfiller, config.series);
        let stream = ConnectionManager::new(config.stream);

        Ok(Self::with_parts(series, stream))
    }

    /// Build from already-constructed parts
    pub fn with_parts(series: HistoricalSeriesBuilder, stream: ConnectionManager) -> Self {
        Self {
            series: Arc::new(series),
            view: Arc::new(SeriesView::new()),
            stream,
        }
    }

    // ========================================================================
    // Historical series
    // ========================================================================

    /// Reconstruct the price series for `instrument` over `request`
    #[instrument(skip(self, instrument), fields(instrument_id = %instrument.id))]
    pub async fn historical_series(
        &self,
        instrument: &Instrument,
        request: SeriesRequest,
    ) -> MarketResult<Vec<PricePoint>> {
        self.series.build(instrument, request).await
    }

    /// Fetch a series for `view`, storing it only if no newer request was
    /// issued on the same view in the meantime
    ///
    /// Returns the ticket and whether the result was stored.
    pub async fn load_series(
        &self,
        view: &SeriesView,
        instrument: &Instrument,
        request: SeriesRequest,
    ) -> MarketResult<(SeriesTicket, bool)> {
        let ticket = view.issue(&instrument.id, request);
        let series = self.series.build(instrument, request).await?;
        let stored = view.complete(&ticket, series);
        Ok((ticket, stored))
    }

    /// Fetch into the default view returned by [`series_view`](Self::series_view)
    pub async fn refresh_series(
        &self,
        instrument: &Instrument,
        request: SeriesRequest,
    ) -> MarketResult<(SeriesTicket, bool)> {
        self.load_series(&self.view, instrument, request).await
    }

    /// Default view; callers with several charts create their own [`SeriesView`]s
    pub fn series_view(&self) -> Arc<SeriesView> {
        Arc::clone(&self.view)
    }

    pub fn series_builder(&self) -> &HistoricalSeriesBuilder {
        &self.series
    }

    // ========================================================================
    // Live updates
    // ========================================================================

    /// Open the streaming connection
    pub fn connect(&self) -> MarketResult<()> {
        info!("Starting market data stream");
        self.stream.connect()
    }

    /// Close the streaming connection and drop every subscription
    pub fn disconnect(&self) {
        info!("Stopping market data stream");
        self.stream.disconnect();
    }

    /// Subscribe to `topic` updates for one outcome of `instrument`
    pub fn subscribe_live<F>(
        &self,
        instrument: &Instrument,
        outcome: Outcome,
        topic: StreamTopic,
        callback: F,
    ) -> Unsubscribe
    where
        F: Fn(&StreamMessage) + Send + Sync + 'static,
    {
        let channel = channel_key(topic, instrument.token(outcome));
        debug!("Live subscription for {} on {}", instrument.id, channel);
        self.stream.subscribe(&channel, callback)
    }

    /// Like [`subscribe_live`](Self::subscribe_live) but hands updates to
    /// `on_flush` in batches of up to `max_items`, or every `flush_interval`.
    ///
    /// Must be called inside a tokio runtime. Unsubscribing flushes whatever
    /// is still pending. A zero `flush_interval` is a configuration error.
    pub fn subscribe_live_buffered<F>(
        &self,
        instrument: &Instrument,
        outcome: Outcome,
        topic: StreamTopic,
        max_items: usize,
        flush_interval: Duration,
        on_flush: F,
    ) -> MarketResult<Unsubscribe>
    where
        F: FnMut(Vec<StreamMessage>) + Send + 'static,
    {
        let buffer = UpdateBuffer::spawn(max_items, flush_interval, on_flush)?;
        Ok(self.subscribe_live(instrument, outcome, topic, move |msg| {
            buffer.push(msg.clone());
        }))
    }

    pub fn stream(&self) -> &ConnectionManager {
        &self.stream
    }
}

impl std::fmt::Debug for MarketDataSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataSync")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::historical_series::SeriesConfig;
    use crate::trade_backfiller::BackfillConfig;
    use async_trait::async_trait;
    use chrono::Utc;
    use marketsync_core::{
        ConnectionState, HistoryInterval, MarketError, SeriesSpan, TradeEvent, TradeQuery,
    };
    use marketsync_polymarket::{
        StreamConfig, StreamCredentials, StreamTransport, TransportChannel, TransportEvent,
    };
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct DenseHistory;

    #[async_trait]
    impl HistorySource for DenseHistory {
        async fn price_history(
            &self,
            _token_id: &str,
            _interval: HistoryInterval,
            _fidelity: Option<u32>,
        ) -> MarketResult<Vec<PricePoint>> {
            // one point a minute over the last day
            let now = Utc::now().timestamp();
            Ok((0..1440)
                .map(|i| PricePoint::derived(now - 86_400 + i * 60, 0.5))
                .collect())
        }
    }

    struct NoTrades;

    #[async_trait]
    impl TradeSource for NoTrades {
        async fn trades(&self, _query: &TradeQuery) -> MarketResult<Vec<TradeEvent>> {
            Err(MarketError::network("unreachable"))
        }
    }

    #[derive(Default)]
    struct LoopbackTransport {
        inbound: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
        written: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    }

    impl LoopbackTransport {
        fn push(&self, text: &str) {
            let guard = self.inbound.lock();
            guard
                .as_ref()
                .unwrap()
                .send(TransportEvent::Frame(text.to_string()))
                .unwrap();
        }

        fn written(&self) -> Vec<Value> {
            let mut guard = self.written.lock();
            let rx = guard.as_mut().unwrap();
            let mut frames = Vec::new();
            while let Ok(text) = rx.try_recv() {
                frames.push(serde_json::from_str(&text).unwrap());
            }
            frames
        }
    }

    #[async_trait]
    impl StreamTransport for LoopbackTransport {
        async fn open(
            &self,
            _url: &str,
            _credentials: &StreamCredentials,
        ) -> MarketResult<TransportChannel> {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            *self.inbound.lock() = Some(in_tx);
            *self.written.lock() = Some(out_rx);
            Ok(TransportChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    fn sync() -> (MarketDataSync, Arc<LoopbackTransport>) {
        let backfiller = TradeBackfiller::new(Arc::new(NoTrades), BackfillConfig::default());
        let builder =
            HistoricalSeriesBuilder::new(Arc::new(DenseHistory), backfiller, SeriesConfig::default());

        let transport = Arc::new(LoopbackTransport::default());
        let config = StreamConfig {
            url: "ws://loopback".to_string(),
            ..StreamConfig::default()
        }
        .with_credentials(StreamCredentials::new("test-key"));
        let stream = ConnectionManager::with_transport(config, transport.clone());

        (MarketDataSync::with_parts(builder, stream), transport)
    }

    fn instrument() -> Instrument {
        Instrument::new("inst", "0xcond", "tok-yes", "tok-no")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_historical_series_uses_primary_source() {
        let (sync, _) = sync();
        let series = sync
            .historical_series(&instrument(), SeriesRequest::new(SeriesSpan::days(1)))
            .await
            .unwrap();

        assert!(!series.is_empty());
        assert!(series.len() <= 1000);
        assert!(series.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_load_series_stores_latest() {
        let (sync, _) = sync();
        let view = SeriesView::new();

        let (ticket, stored) = sync
            .load_series(&view, &instrument(), SeriesRequest::new(SeriesSpan::hours(6)))
            .await
            .unwrap();

        assert!(stored);
        let (current, points) = view.current().unwrap();
        assert_eq!(current, ticket);
        assert!(!points.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_series_fills_default_view() {
        let (sync, _) = sync();
        assert!(sync.series_view().current().is_none());

        let (_, stored) = sync
            .refresh_series(&instrument(), SeriesRequest::new(SeriesSpan::days(1)))
            .await
            .unwrap();

        assert!(stored);
        let (ticket, _) = sync.series_view().current().unwrap();
        assert_eq!(ticket.instrument_id, "inst");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_live_routes_outcome_channel() {
        let (sync, transport) = sync();
        sync.connect().unwrap();
        settle().await;
        assert_eq!(sync.stream().state(), ConnectionState::Connected);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let _sub = sync.subscribe_live(&instrument(), Outcome::Complement, StreamTopic::Price, move |m| {
            sink.lock().push(m.channel.clone());
        });

        let frames = transport.written();
        assert_eq!(frames[0]["type"], "subscribe");
        assert_eq!(frames[0]["channel"], "price:tok-no");

        transport.push(r#"{"type":"price_change","asset_id":"tok-no","price":"0.41"}"#);
        transport.push(r#"{"type":"price_change","asset_id":"tok-yes","price":"0.59"}"#);
        settle().await;

        assert_eq!(*received.lock(), vec!["price:tok-no".to_string()]);
        sync.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_subscription_flushes_on_unsubscribe() {
        let (sync, transport) = sync();
        sync.connect().unwrap();
        settle().await;

        let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let sub = sync.subscribe_live_buffered(
            &instrument(),
            Outcome::Primary,
            StreamTopic::Trade,
            10,
            Duration::from_secs(60),
            move |batch| sink.lock().push(batch.len()),
        )
        .unwrap();

        for _ in 0..3 {
            transport.push(r#"{"type":"last_trade_price","asset_id":"tok-yes","price":"0.6"}"#);
        }
        settle().await;
        assert!(batches.lock().is_empty());

        assert!(sub.unsubscribe());
        settle().await;
        assert_eq!(*batches.lock(), vec![3]);
        sync.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_subscription_rejects_zero_flush_interval() {
        let (sync, transport) = sync();
        sync.connect().unwrap();
        settle().await;

        let result = sync.subscribe_live_buffered(
            &instrument(),
            Outcome::Primary,
            StreamTopic::Trade,
            10,
            Duration::ZERO,
            |_| {},
        );

        assert!(matches!(result, Err(MarketError::Configuration(_))));
        assert!(transport.written().is_empty());
        sync.disconnect();
    }
}
