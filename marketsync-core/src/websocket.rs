//! Streaming message types shared between the connection layer and its callers
//!
//! Upstream frames are JSON objects carrying a `type` and usually a `channel`.
//! Control frames (subscribe/unsubscribe/ping/pong) are defined here too.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Connection state
// ============================================================================

/// Lifecycle state of the streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected. Terminal after `disconnect()` or exhausted retries.
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Socket open, heartbeat running
    Connected,
    /// Waiting for or performing a reconnect attempt
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Topics and channels
// ============================================================================

/// Topic bucket a data frame is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamTopic {
    Orderbook,
    Trade,
    Price,
    Order,
}

impl StreamTopic {
    /// Classify an upstream `type` discriminator
    pub fn classify(kind: &str) -> Option<Self> {
        match kind {
            "orderbook" | "book" => Some(StreamTopic::Orderbook),
            "trade" | "last_trade_price" => Some(StreamTopic::Trade),
            "price" | "price_change" => Some(StreamTopic::Price),
            "order" => Some(StreamTopic::Order),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamTopic::Orderbook => "orderbook",
            StreamTopic::Trade => "trade",
            StreamTopic::Price => "price",
            StreamTopic::Order => "order",
        }
    }
}

impl fmt::Display for StreamTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel key for a topic on one asset, e.g. `price:71321045`
pub fn channel_key(topic: StreamTopic, asset: &str) -> String {
    format!("{}:{}", topic, asset)
}

/// A classified data frame delivered to subscriber callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub topic: StreamTopic,
    pub channel: String,
    pub payload: serde_json::Value,
}

// ============================================================================
// Control frames
// ============================================================================

/// Frames this core writes upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
    Pong,
}

impl ControlFrame {
    pub fn to_json(&self) -> String {
        // infallible for this enum
        serde_json::to_string(self).unwrap_or_default()
    }
}
