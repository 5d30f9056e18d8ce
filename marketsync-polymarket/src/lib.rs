//! Polymarket adapters for the market-data synchronization core
//!
//! - [`PolymarketClient`]: REST client for the CLOB price-history endpoint and
//!   the data API trade endpoint, one parser per trade schema version.
//! - [`ConnectionManager`]: the resilient streaming connection, with its
//!   [`SubscriptionRegistry`], outbound message queue, and transport.
//!
//! The streaming channel needs a credential. [`StreamConfig::default`] has
//! none; load one from `POLY_API_KEY` (and optionally `POLY_SECRET` /
//! `POLY_PASSPHRASE`) with [`StreamCredentials::from_env`], or build
//! [`StreamCredentials`] explicitly.

pub mod backoff;
pub mod client;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod types;
pub mod websocket;

pub use backoff::Backoff;
pub use client::{ClientConfig, PolymarketClient};
pub use queue::{MessageQueue, QueuedMessage};
pub use registry::{Outbound, StreamCallback, SubscriptionRegistry, Unsubscribe};
pub use transport::{StreamTransport, TransportChannel, TransportEvent, WsTransport};
pub use types::{ParsedTrade, PriceHistoryPoint, TradeSchema};
pub use websocket::{ConnectionManager, SendOutcome, StreamConfig, StreamCredentials, STREAM_URL};
