//! Socket transport behind the connection manager
//!
//! A transport opens one socket and bridges it to a pair of channels: text
//! frames written to `outbound` go to the socket, and everything read from
//! the socket arrives on `inbound`. Dropping `outbound` closes the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use marketsync_core::{MarketError, MarketResult};

use crate::websocket::StreamCredentials;

/// Something read from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame
    Frame(String),
    /// The socket closed; carries the reason when there is one
    Closed(Option<String>),
}

/// Channel pair for one open socket
#[derive(Debug)]
pub struct TransportChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens sockets for the connection manager
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    async fn open(&self, url: &str, credentials: &StreamCredentials)
        -> MarketResult<TransportChannel>;
}

/// tokio-tungstenite transport
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(
        &self,
        url: &str,
        credentials: &StreamCredentials,
    ) -> MarketResult<TransportChannel> {
        let url = Url::parse(url)
            .map_err(|e| MarketError::configuration(format!("Invalid stream URL {}: {}", url, e)))?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| MarketError::configuration(format!("Invalid stream URL {}: {}", url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key))
            .map_err(|e| MarketError::configuration(format!("Invalid API key: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| MarketError::network(format!("Stream connect failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(text) => {
                                if let Err(e) = write.send(Message::Text(text.into())).await {
                                    warn!("[Stream] Failed to write frame: {}", e);
                                    let _ = inbound_tx.send(TransportEvent::Closed(Some(e.to_string())));
                                    break;
                                }
                            }
                            None => {
                                // Manager dropped its sender: intentional close
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if inbound_tx.send(TransportEvent::Frame(text.to_string())).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    let _ = inbound_tx.send(TransportEvent::Closed(Some(e.to_string())));
                                    break;
                                }
                            }
                            Some(Ok(Message::Pong(_))) => {
                                // counts as liveness upstream
                                if inbound_tx.send(TransportEvent::Frame("pong".to_string())).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                debug!("[Stream] Closed by server: {:?}", frame);
                                let _ = inbound_tx.send(TransportEvent::Closed(
                                    frame.map(|f| f.reason.to_string()),
                                ));
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = inbound_tx.send(TransportEvent::Closed(Some(e.to_string())));
                                break;
                            }
                            None => {
                                let _ = inbound_tx.send(TransportEvent::Closed(None));
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(TransportChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
