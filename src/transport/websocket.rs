use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::channel::{Connector, LinkEvent, Outbound, TransportChannel};
use crate::error::{CallError, Result};

/// Opens call channels over WebSocket.
///
/// The identity travels as a bearer token on the upgrade request. Binary
/// messages carry PCM16, text messages carry JSON control frames.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    inbound_rate: u32,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            inbound_rate: 16000,
        }
    }
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration, inbound_rate: u32) -> Self {
        Self {
            connect_timeout,
            inbound_rate,
        }
    }

    fn validate(endpoint: &str) -> Result<Url> {
        let url = Url::parse(endpoint)
            .map_err(|e| CallError::Connection(format!("invalid endpoint {}: {}", endpoint, e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(CallError::Connection(format!(
                "unsupported endpoint scheme: {}",
                other
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &str, identity: &str) -> Result<TransportChannel> {
        let url = Self::validate(endpoint)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CallError::Connection(format!("bad request: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", identity))
            .map_err(|_| CallError::Connection("identity is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        info!("Connecting to {}", url);
        let (stream, response) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| CallError::Connection(format!("timed out connecting to {}", url)))?
            .map_err(|e| CallError::Connection(format!("handshake with {} failed: {}", url, e)))?;
        debug!("Handshake complete: HTTP {}", response.status());

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let (mut write, mut read) = stream.split();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let _ = in_tx.send(LinkEvent::Binary(data.to_vec()));
                            }
                            Some(Ok(Message::Text(text))) => {
                                let _ = in_tx.send(LinkEvent::Text(text.to_string()));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame.map(|f| f.reason.to_string());
                                info!("Server closed connection: {:?}", reason);
                                let _ = in_tx.send(LinkEvent::Closed(reason));
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("WebSocket error: {}", e);
                                let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                let _ = in_tx.send(LinkEvent::Closed(None));
                                break;
                            }
                        }
                    }
                    cmd = out_rx.recv() => {
                        let result = match cmd {
                            Some(Outbound::Audio(frame)) => {
                                write.send(Message::Binary(frame.into_bytes().into())).await
                            }
                            Some(Outbound::Control(message)) => match message.to_json() {
                                Ok(json) => write.send(Message::Text(json.into())).await,
                                Err(e) => {
                                    warn!("Failed to encode control message: {}", e);
                                    Ok(())
                                }
                            },
                            Some(Outbound::Close) | None => {
                                let _ = write.send(Message::Close(None)).await;
                                let _ = write.close().await;
                                debug!("WebSocket link closed locally");
                                break;
                            }
                        };

                        if let Err(e) = result {
                            warn!("WebSocket send failed: {}", e);
                            let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                            break;
                        }
                    }
                }
            }
        });

        Ok(TransportChannel::new(out_tx, in_rx, self.inbound_rate).with_task(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_schemes() {
        assert!(matches!(
            WebSocketConnector::validate("http://localhost:8000/ws/speech/alice/default/"),
            Err(CallError::Connection(_))
        ));
        assert!(matches!(
            WebSocketConnector::validate("not a url"),
            Err(CallError::Connection(_))
        ));
        assert!(WebSocketConnector::validate("wss://example.com/ws/speech/alice/default/").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let connector = WebSocketConnector::new(Duration::from_secs(2), 16000);
        // Port 9 (discard) on loopback is not listening
        let result = connector.open("ws://127.0.0.1:9/ws", "alice").await;
        assert!(matches!(result, Err(CallError::Connection(_))));
    }
}
