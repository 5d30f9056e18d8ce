//! Upstream REST client
//!
//! Provides the primary history endpoint (pre-aggregated prices) and the
//! trade endpoint (raw fills). One instance is built from injected
//! configuration and shared by reference; nothing here is process-global.

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use marketsync_core::{
    HistoryInterval, HistorySource, LogThrottle, MarketError, MarketResult, PricePoint,
    TradeEvent, TradeQuery, TradeSource,
};

use crate::types::{
    ParsedTrade, PricesHistoryResponse, TradeSchema, CLOB_API_BASE, DATA_API_BASE,
};

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`PolymarketClient`]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub clob_url: String,
    pub data_api_url: String,
    pub request_timeout: Duration,
    /// Record schema served by the trade endpoint
    pub trade_schema: TradeSchema,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            clob_url: CLOB_API_BASE.to_string(),
            data_api_url: DATA_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            trade_schema: TradeSchema::default(),
        }
    }
}

impl ClientConfig {
    /// Point both endpoints at one base URL (mock servers, proxies)
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.clob_url = base.to_string();
        self.data_api_url = base.to_string();
        self
    }

    pub fn with_trade_schema(mut self, schema: TradeSchema) -> Self {
        self.trade_schema = schema;
        self
    }
}

/// REST client for the history and trade endpoints
pub struct PolymarketClient {
    client: Client,
    config: ClientConfig,
    unparseable_log: LogThrottle,
}

impl PolymarketClient {
    /// Create a client from explicit configuration
    pub fn new(config: ClientConfig) -> MarketResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MarketError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            unparseable_log: LogThrottle::default(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get price history for a token from the CLOB API
    ///
    /// # Arguments
    /// * `token_id` - The CLOB token ID of the primary outcome
    /// * `interval` - Upstream interval enum
    /// * `fidelity_override` - Optional minutes per sample (lower = more points)
    #[instrument(skip(self))]
    pub async fn get_prices_history(
        &self,
        token_id: &str,
        interval: HistoryInterval,
        fidelity_override: Option<u32>,
    ) -> MarketResult<Vec<PricePoint>> {
        let fidelity = fidelity_override.unwrap_or_else(|| interval.default_fidelity());

        let url = format!("{}/prices-history", self.config.clob_url);
        let params = [
            ("market", token_id.to_string()),
            ("interval", interval.to_string()),
            ("fidelity", fidelity.to_string()),
        ];

        debug!("Fetching price history from: {} {:?}", url, params);

        let response = self.send(&url, &params, "price history").await?;

        let body: serde_json::Value = response.json().await.map_err(|e| {
            MarketError::schema("prices-history", format!("body is not JSON: {}", e))
        })?;
        let parsed: PricesHistoryResponse = serde_json::from_value(body).map_err(|e| {
            MarketError::schema("prices-history", format!("unexpected shape: {}", e))
        })?;

        let mut points: Vec<PricePoint> = parsed
            .history
            .iter()
            .filter_map(|p| p.to_price_point())
            .collect();
        if points.len() < parsed.history.len() {
            debug!(
                "Dropped {} out-of-range history points for {}",
                parsed.history.len() - points.len(),
                token_id
            );
        }

        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        Ok(points)
    }

    /// Get raw trades for a condition from the trade endpoint
    #[instrument(skip(self))]
    pub async fn get_trades(&self, query: &TradeQuery) -> MarketResult<Vec<TradeEvent>> {
        let url = format!("{}/trades", self.config.data_api_url);
        let mut params = vec![
            ("market", query.market.clone()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("start", start.to_string()));
        }
        if let Some(end) = query.end {
            params.push(("end", end.to_string()));
        }

        debug!("Fetching trades from: {} {:?}", url, params);

        let response = self.send(&url, &params, "trades").await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MarketError::schema("trades", format!("body is not JSON: {}", e)))?;
        let records = body
            .as_array()
            .ok_or_else(|| MarketError::schema("trades", "expected a JSON array"))?;

        let schema = self.config.trade_schema;
        let mut trades = Vec::with_capacity(records.len());
        let mut rejected = 0usize;
        let mut last_reason = None;

        for record in records {
            match schema.parse(record, &query.instrument_id) {
                ParsedTrade::Trade(trade) => trades.push(trade),
                ParsedTrade::Unparseable(reason) => {
                    rejected += 1;
                    last_reason = Some(reason);
                }
            }
        }

        if let Some(reason) = last_reason {
            if trades.is_empty() {
                return Err(MarketError::schema(
                    format!("trades/{}", schema.name()),
                    format!("no parseable records ({} rejected): {}", rejected, reason),
                ));
            }
            if let Some(suppressed) = self.unparseable_log.check(schema.name()) {
                warn!(
                    "Skipped {} unparseable {} trade records ({} earlier warnings suppressed): {}",
                    rejected,
                    schema.name(),
                    suppressed,
                    reason
                );
            }
        }

        Ok(trades)
    }

    async fn send(
        &self,
        url: &str,
        params: &[(&str, String)],
        what: &str,
    ) -> MarketResult<Response> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| MarketError::network(format!("Failed to fetch {}: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MarketError::network(format!(
                "{} request failed ({}): {}",
                what, status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl HistorySource for PolymarketClient {
    async fn price_history(
        &self,
        token_id: &str,
        interval: HistoryInterval,
        fidelity: Option<u32>,
    ) -> MarketResult<Vec<PricePoint>> {
        self.get_prices_history(token_id, interval, fidelity).await
    }
}

#[async_trait]
impl TradeSource for PolymarketClient {
    async fn trades(&self, query: &TradeQuery) -> MarketResult<Vec<TradeEvent>> {
        self.get_trades(query).await
    }
}

impl std::fmt::Debug for PolymarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketClient")
            .field("clob_url", &self.config.clob_url)
            .field("data_api_url", &self.config.data_api_url)
            .finish()
    }
}
