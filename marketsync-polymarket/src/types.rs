//! Upstream REST response types
//!
//! Each known trade-endpoint schema version has its own typed record and its
//! own parsing function. Parsers never guess field names: a record either
//! matches its schema exactly or comes back as [`ParsedTrade::Unparseable`].

use serde::{Deserialize, Serialize};

use marketsync_core::{Outcome, PricePoint, TradeEvent};

/// Base URL for the CLOB API (price history)
pub const CLOB_API_BASE: &str = "https://clob.polymarket.com";

/// Base URL for the public data API (trades, no auth required)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Timestamps above this are milliseconds
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

// ============================================================================
// Price History Types (from CLOB API /prices-history)
// ============================================================================

/// Response from GET /prices-history
#[derive(Debug, Clone, Deserialize)]
pub struct PricesHistoryResponse {
    /// List of timestamp/price pairs
    pub history: Vec<PriceHistoryPoint>,
}

/// A single price point from the CLOB API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceHistoryPoint {
    /// Unix timestamp in seconds
    pub t: i64,
    /// Price (0.0 - 1.0)
    pub p: f64,
}

impl PriceHistoryPoint {
    /// Primary-outcome point; `None` if the price is outside [0, 1]
    pub fn to_price_point(&self) -> Option<PricePoint> {
        if !(0.0..=1.0).contains(&self.p) {
            return None;
        }
        Some(PricePoint::derived(normalize_timestamp(self.t), self.p))
    }
}

// ============================================================================
// Trade Types (from the trade endpoint)
// ============================================================================

/// Result of parsing one upstream trade record
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTrade {
    Trade(TradeEvent),
    Unparseable(String),
}

/// Known versions of the trade endpoint's record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TradeSchema {
    /// `{id, outcomeIndex, amount, price, timestamp, counterparty, txRef}`
    #[default]
    Ledger,
    /// `{asset, conditionId, side, size, price, timestamp, outcomeIndex, transactionHash}`
    DataApi,
}

impl TradeSchema {
    pub fn parse(&self, value: &serde_json::Value, instrument_id: &str) -> ParsedTrade {
        match self {
            TradeSchema::Ledger => parse_ledger_trade(value, instrument_id),
            TradeSchema::DataApi => parse_data_api_trade(value, instrument_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TradeSchema::Ledger => "ledger",
            TradeSchema::DataApi => "data-api",
        }
    }
}

impl std::str::FromStr for TradeSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ledger" => Ok(TradeSchema::Ledger),
            "data-api" | "data_api" | "dataapi" => Ok(TradeSchema::DataApi),
            _ => Err(format!("Unknown trade schema: {}", s)),
        }
    }
}

/// Trade record, ledger schema
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTrade {
    pub id: String,
    pub outcome_index: u64,
    pub amount: f64,
    pub price: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub tx_ref: Option<String>,
}

/// Trade record, public data-API schema
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataApiTrade {
    /// Side (BUY or SELL)
    pub side: String,
    /// Asset/token ID
    pub asset: String,
    /// Condition ID (market hash)
    pub condition_id: String,
    /// Trade size (amount)
    pub size: f64,
    /// Trade price
    pub price: f64,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// 0 = primary, 1 = complement
    pub outcome_index: u64,
    /// Transaction hash
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

/// Parse a ledger-schema record
pub fn parse_ledger_trade(value: &serde_json::Value, instrument_id: &str) -> ParsedTrade {
    let record = match serde_json::from_value::<LedgerTrade>(value.clone()) {
        Ok(record) => record,
        Err(e) => return ParsedTrade::Unparseable(format!("ledger: {}", e)),
    };

    let Some(outcome) = Outcome::from_index(record.outcome_index) else {
        return ParsedTrade::Unparseable(format!(
            "ledger: outcomeIndex {} out of range",
            record.outcome_index
        ));
    };
    if let Some(reason) = invalid_price(record.price) {
        return ParsedTrade::Unparseable(format!("ledger: {}", reason));
    }

    ParsedTrade::Trade(TradeEvent {
        id: record.id,
        instrument_id: instrument_id.to_string(),
        outcome,
        amount: record.amount,
        price: record.price,
        timestamp: normalize_timestamp(record.timestamp),
        origin: record.tx_ref,
    })
}

/// Parse a data-API-schema record
///
/// The data API has no trade id; the transaction hash plus asset and outcome
/// identify a fill. Records without a hash cannot be deduplicated and are rejected.
pub fn parse_data_api_trade(value: &serde_json::Value, instrument_id: &str) -> ParsedTrade {
    let record = match serde_json::from_value::<DataApiTrade>(value.clone()) {
        Ok(record) => record,
        Err(e) => return ParsedTrade::Unparseable(format!("data-api: {}", e)),
    };

    let Some(outcome) = Outcome::from_index(record.outcome_index) else {
        return ParsedTrade::Unparseable(format!(
            "data-api: outcomeIndex {} out of range",
            record.outcome_index
        ));
    };
    if let Some(reason) = invalid_price(record.price) {
        return ParsedTrade::Unparseable(format!("data-api: {}", reason));
    }
    let Some(tx) = record.transaction_hash.filter(|h| !h.is_empty()) else {
        return ParsedTrade::Unparseable("data-api: missing transactionHash".to_string());
    };

    ParsedTrade::Trade(TradeEvent {
        id: format!("{}:{}:{}:{}", tx, record.asset, record.outcome_index, record.side),
        instrument_id: instrument_id.to_string(),
        outcome,
        amount: record.size,
        price: record.price,
        timestamp: normalize_timestamp(record.timestamp),
        origin: Some(tx),
    })
}

fn invalid_price(price: f64) -> Option<String> {
    if price.is_finite() && (0.0..=1.0).contains(&price) {
        None
    } else {
        Some(format!("price {} outside [0, 1]", price))
    }
}

/// Convert millisecond timestamps to seconds
pub fn normalize_timestamp(ts: i64) -> i64 {
    if ts > MILLIS_THRESHOLD {
        ts / 1000
    } else {
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ledger_trade() {
        let value = json!({
            "id": "fill-1",
            "outcomeIndex": 1,
            "amount": 12.5,
            "price": 0.42,
            "timestamp": 1_700_000_000,
            "counterparty": "0xabc",
            "txRef": "0xdead"
        });

        match parse_ledger_trade(&value, "inst") {
            ParsedTrade::Trade(trade) => {
                assert_eq!(trade.id, "fill-1");
                assert_eq!(trade.instrument_id, "inst");
                assert_eq!(trade.outcome, Outcome::Complement);
                assert_eq!(trade.price, 0.42);
                assert_eq!(trade.origin.as_deref(), Some("0xdead"));
            }
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_ledger_parser_does_not_accept_data_api_fields() {
        let value = json!({
            "side": "BUY",
            "asset": "123",
            "conditionId": "0xc",
            "size": 5.0,
            "price": 0.5,
            "timestamp": 1_700_000_000,
            "outcomeIndex": 0,
            "transactionHash": "0x1"
        });

        assert!(matches!(parse_ledger_trade(&value, "inst"), ParsedTrade::Unparseable(_)));
        assert!(matches!(parse_data_api_trade(&value, "inst"), ParsedTrade::Trade(_)));
    }

    #[test]
    fn test_out_of_range_values_are_unparseable() {
        let bad_price = json!({
            "id": "x", "outcomeIndex": 0, "amount": 1.0, "price": 57.0, "timestamp": 1
        });
        let bad_outcome = json!({
            "id": "x", "outcomeIndex": 3, "amount": 1.0, "price": 0.5, "timestamp": 1
        });

        assert!(matches!(parse_ledger_trade(&bad_price, "i"), ParsedTrade::Unparseable(_)));
        assert!(matches!(parse_ledger_trade(&bad_outcome, "i"), ParsedTrade::Unparseable(_)));
    }

    #[test]
    fn test_data_api_trade_without_hash_is_rejected() {
        let value = json!({
            "side": "SELL",
            "asset": "123",
            "conditionId": "0xc",
            "size": 5.0,
            "price": 0.5,
            "timestamp": 1_700_000_000_000i64,
            "outcomeIndex": 0
        });

        assert!(matches!(parse_data_api_trade(&value, "inst"), ParsedTrade::Unparseable(_)));
    }

    #[test]
    fn test_millisecond_timestamps_are_normalized() {
        assert_eq!(normalize_timestamp(1_700_000_000_123), 1_700_000_000);
        assert_eq!(normalize_timestamp(1_700_000_000), 1_700_000_000);
    }

    #[test]
    fn test_schema_from_str() {
        assert_eq!("ledger".parse::<TradeSchema>(), Ok(TradeSchema::Ledger));
        assert_eq!("data-api".parse::<TradeSchema>(), Ok(TradeSchema::DataApi));
        assert!("v3".parse::<TradeSchema>().is_err());
    }
}
