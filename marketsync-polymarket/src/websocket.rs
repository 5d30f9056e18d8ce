//! Streaming connection manager
//!
//! Owns one logical streaming connection: opens it through a
//! [`StreamTransport`], keeps it alive with a heartbeat and a health check,
//! reconnects with exponential backoff after any unintended close, and
//! routes classified frames to the [`SubscriptionRegistry`].
//!
//! Failures are never returned to subscribers. They surface only through
//! [`ConnectionManager::state`] and [`ConnectionManager::state_changes`].

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use marketsync_core::{
    channel_key, ConnectionState, ControlFrame, LogThrottle, MarketError, MarketResult,
    StreamMessage, StreamTopic,
};

use crate::backoff::Backoff;
use crate::queue::{MessageQueue, QueuedMessage};
use crate::registry::{Outbound, StreamCallback, SubscriptionRegistry, Unsubscribe};
use crate::transport::{StreamTransport, TransportChannel, TransportEvent, WsTransport};

/// Polymarket market-channel WebSocket URL
pub const STREAM_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const STALE_MULTIPLE: u32 = 2;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const QUEUE_CAPACITY: usize = 256;
const REPLAY_WINDOW: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Configuration
// ============================================================================

/// Credential for the streaming channel
#[derive(Clone)]
pub struct StreamCredentials {
    pub api_key: String,
    pub secret: Option<String>,
    pub passphrase: Option<String>,
}

impl StreamCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: None,
            passphrase: None,
        }
    }

    /// Load from `POLY_API_KEY` (+ optional `POLY_SECRET`, `POLY_PASSPHRASE`)
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable lookup.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            api_key: get("POLY_API_KEY")?,
            secret: get("POLY_SECRET"),
            passphrase: get("POLY_PASSPHRASE"),
        })
    }
}

impl std::fmt::Debug for StreamCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCredentials")
            .field("api_key", &"[redacted]")
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Configuration for [`ConnectionManager`]
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub url: String,
    pub credentials: Option<StreamCredentials>,
    pub heartbeat_interval: Duration,
    /// Stale after `heartbeat_interval * stale_multiple` without any inbound frame
    pub stale_multiple: u32,
    pub health_check_interval: Duration,
    pub reconnect_base: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub queue_capacity: usize,
    pub replay_window: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: STREAM_URL.to_string(),
            credentials: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            stale_multiple: STALE_MULTIPLE,
            health_check_interval: HEALTH_CHECK_INTERVAL,
            reconnect_base: RECONNECT_DELAY_BASE,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            queue_capacity: QUEUE_CAPACITY,
            replay_window: REPLAY_WINDOW,
        }
    }
}

impl StreamConfig {
    pub fn with_credentials(mut self, credentials: StreamCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = None;
        self
    }

    pub fn stale_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.stale_multiple.max(1))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_base, self.max_reconnect_delay)
    }

    /// Reject timer settings the session loop cannot run with
    pub fn validate(&self) -> MarketResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(MarketError::configuration("heartbeat interval must be non-zero"));
        }
        if self.health_check_interval.is_zero() {
            return Err(MarketError::configuration(
                "health check interval must be non-zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Connection manager
// ============================================================================

/// What [`ConnectionManager::send`] did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open socket
    Sent,
    /// Held for replay on the next successful open
    Queued,
}

struct Session {
    generation: u64,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: StreamConfig,
    transport: Arc<dyn StreamTransport>,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Arc<Outbound>,
    registry: Arc<SubscriptionRegistry>,
    queue: Mutex<MessageQueue>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    missing_credentials_logged: AtomicBool,
    log_throttle: LogThrottle,
}

/// Resilient streaming connection with live subscriptions
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

impl ConnectionManager {
    /// Manager over the tokio-tungstenite transport
    pub fn new(config: StreamConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    pub fn with_transport(config: StreamConfig, transport: Arc<dyn StreamTransport>) -> Self {
        let outbound = Arc::new(Outbound::new());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(MessageQueue::new(config.queue_capacity)),
                registry: Arc::new(SubscriptionRegistry::new(Arc::clone(&outbound))),
                outbound,
                config,
                transport,
                state_tx,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                missing_credentials_logged: AtomicBool::new(false),
                log_throttle: LogThrottle::default(),
            }),
        }
    }

    /// Start the connection in the background
    ///
    /// Without a credential this is a permanent no-op that returns
    /// `MarketError::Configuration` (logged once). Calling it while a
    /// connection is already running does nothing.
    pub fn connect(&self) -> MarketResult<()> {
        let Some(credentials) = self.inner.config.credentials.clone() else {
            if !self.inner.missing_credentials_logged.swap(true, Ordering::SeqCst) {
                error!("[Stream] No API key configured (POLY_API_KEY); live updates disabled");
            }
            return Err(MarketError::configuration("no stream credential configured"));
        };
        if let Err(e) = self.inner.config.validate() {
            error!("[Stream] Invalid stream config: {}", e);
            return Err(e);
        }

        let mut session = self.inner.session.lock();
        if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            debug!("[Stream] connect() called while already running");
            return Ok(());
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        info!("[Stream] Connecting to {}", self.inner.config.url);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            supervise(inner, generation, credentials, shutdown_rx).await;
        });

        *session = Some(Session {
            generation,
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Close the connection for good
    ///
    /// Resets the attempt counter, clears every subscription and the message
    /// queue. No reconnection happens afterwards until `connect()` is called
    /// again.
    pub fn disconnect(&self) {
        let previous = self.inner.session.lock().take();
        if let Some(session) = previous {
            let _ = session.shutdown.send(true);
            session.handle.abort();
            debug!("[Stream] Stopped session {}", session.generation);
        }

        // dropping the writer closes the socket
        drop(self.inner.outbound.detach());
        self.inner.registry.clear();
        self.inner.queue.lock().clear();
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected);
        info!("[Stream] Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state transition
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts made since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Write a message now, or queue it for replay while not connected
    pub fn send(&self, kind: &str, payload: Value) -> SendOutcome {
        let message = QueuedMessage {
            kind: kind.to_string(),
            payload,
            enqueued_at: Instant::now(),
        };

        let mut queue = self.inner.queue.lock();
        if self.is_connected() && self.inner.outbound.send(message.to_frame()) {
            return SendOutcome::Sent;
        }
        if let Some(evicted) = queue.push(message) {
            debug!("[Stream] Queue full, evicted oldest {} message", evicted.kind);
        }
        SendOutcome::Queued
    }

    /// Messages waiting for the next open
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Register a callback on a channel
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Unsubscribe
    where
        F: Fn(&StreamMessage) + Send + Sync + 'static,
    {
        let callback: StreamCallback = Arc::new(callback);
        self.inner.registry.subscribe(channel, callback)
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// State change from a session task; ignored once that session was replaced
    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        let session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.generation == generation) {
            self.set_state(next);
            true
        } else {
            false
        }
    }

    fn attach(&self, generation: u64, tx: mpsc::UnboundedSender<String>) -> bool {
        let session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.generation == generation) {
            self.outbound.attach(tx);
            true
        } else {
            false
        }
    }

    fn detach(&self, generation: u64) {
        let session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.generation == generation) {
            drop(self.outbound.detach());
        }
    }

    /// Resubscribe, replay fresh queued messages, then mark connected
    fn on_open(&self, generation: u64) -> (usize, usize) {
        let resubscribed = self.registry.resubscribe_all();

        let mut queue = self.queue.lock();
        let fresh = queue.drain_fresh(Instant::now(), self.config.replay_window);
        let mut replayed = 0;
        for message in fresh {
            if self.outbound.send(message.to_frame()) {
                replayed += 1;
            } else {
                queue.push(message);
            }
        }
        self.transition(generation, ConnectionState::Connected);
        (resubscribed, replayed)
    }

    fn handle_text(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("pong") {
            return;
        }
        if trimmed.eq_ignore_ascii_case("ping") {
            self.outbound.send(ControlFrame::Pong.to_json());
            return;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(frames)) => {
                for frame in frames {
                    self.handle_frame(frame);
                }
            }
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                if let Some(suppressed) = self.log_throttle.check("stream:unparseable") {
                    warn!(
                        "[Stream] Unparseable frame ({} suppressed): {}",
                        suppressed, e
                    );
                }
            }
        }
    }

    fn handle_frame(&self, frame: Value) {
        let kind = frame
            .get("type")
            .or_else(|| frame.get("event_type"))
            .and_then(Value::as_str)
            .unwrap_or("");

        match kind {
            "ping" => {
                self.outbound.send(ControlFrame::Pong.to_json());
                return;
            }
            "pong" => return,
            _ => {}
        }

        if let Some(err) = frame.get("error") {
            if let Some(suppressed) = self.log_throttle.check("stream:error") {
                error!("[Stream] Upstream error ({} suppressed): {}", suppressed, err);
            }
            return;
        }

        let Some(topic) = StreamTopic::classify(kind) else {
            debug!("[Stream] Ignoring frame type {:?}", kind);
            return;
        };

        let channel = match frame.get("channel").and_then(Value::as_str) {
            Some(channel) => channel.to_string(),
            None => match frame.get("asset_id").and_then(Value::as_str) {
                Some(asset) => channel_key(topic, asset),
                None => {
                    debug!("[Stream] {} frame without channel or asset_id", topic);
                    return;
                }
            },
        };

        self.registry.dispatch(&StreamMessage {
            topic,
            channel,
            payload: frame,
        });
    }
}

/// Open, run, and reopen the connection until shutdown or retries run out
async fn supervise(
    inner: Arc<Inner>,
    generation: u64,
    credentials: StreamCredentials,
    mut shutdown: watch::Receiver<bool>,
) {
    let backoff = inner.config.backoff();

    loop {
        let opened = tokio::select! {
            _ = shutdown.changed() => return,
            opened = inner.transport.open(&inner.config.url, &credentials) => opened,
        };

        match opened {
            Ok(channel) => match run_session(&inner, generation, channel, &mut shutdown).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Lost(reason) => {
                    if let Some(suppressed) = inner.log_throttle.check("stream:lost") {
                        warn!(
                            "[Stream] Connection lost: {} ({} similar suppressed)",
                            reason, suppressed
                        );
                    }
                }
            },
            Err(e) if !e.is_retryable() => {
                error!("[Stream] Connection failed permanently: {}", e);
                inner.transition(generation, ConnectionState::Disconnected);
                return;
            }
            Err(e) => {
                if let Some(suppressed) = inner.log_throttle.check(&e.log_key()) {
                    warn!(
                        "[Stream] Connection failed: {} ({} similar suppressed)",
                        e, suppressed
                    );
                }
            }
        }

        if !inner.is_current(generation) {
            return;
        }

        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > inner.config.max_reconnect_attempts {
            error!(
                "[Stream] Max reconnect attempts ({}) reached, giving up",
                inner.config.max_reconnect_attempts
            );
            inner.transition(generation, ConnectionState::Disconnected);
            return;
        }

        inner.transition(generation, ConnectionState::Reconnecting);
        let delay = backoff.delay(attempt);
        info!("[Stream] Reconnecting in {:?} (attempt {})", delay, attempt);

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(
    inner: &Inner,
    generation: u64,
    channel: TransportChannel,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let TransportChannel {
        outbound,
        mut inbound,
    } = channel;

    if !inner.attach(generation, outbound) {
        return SessionEnd::Shutdown;
    }
    inner.reconnect_attempts.store(0, Ordering::SeqCst);
    let (resubscribed, replayed) = inner.on_open(generation);
    info!(
        "[Stream] Connected ({} channels resubscribed, {} queued messages replayed)",
        resubscribed, replayed
    );

    let config = &inner.config;
    let stale_after = config.stale_timeout();
    let now = Instant::now();
    let mut heartbeat = interval_at(now + config.heartbeat_interval, config.heartbeat_interval);
    let mut health = interval_at(
        now + config.health_check_interval,
        config.health_check_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = now;

    let end = loop {
        tokio::select! {
            _ = shutdown.changed() => break SessionEnd::Shutdown,

            event = inbound.recv() => match event {
                Some(TransportEvent::Frame(text)) => {
                    last_seen = Instant::now();
                    inner.handle_text(&text);
                }
                Some(TransportEvent::Closed(reason)) => {
                    break SessionEnd::Lost(reason.unwrap_or_else(|| "closed by server".to_string()));
                }
                None => break SessionEnd::Lost("transport ended".to_string()),
            },

            _ = heartbeat.tick() => {
                if !inner.outbound.send(ControlFrame::Ping.to_json()) {
                    break SessionEnd::Lost("heartbeat write failed".to_string());
                }
            }

            _ = health.tick() => {
                let silent = last_seen.elapsed();
                if silent >= stale_after {
                    break SessionEnd::Lost(format!("stale, no frames for {:?}", silent));
                }
            }
        }
    };

    inner.detach(generation);
    end
}
