//! Websocket implementation of the transport seam.
//!
//! Speaks the JSON envelope from [`super::frame`] over a
//! `tokio-tungstenite` stream and keeps the link alive with periodic
//! pings. Subscription ids are client-assigned per link.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use async_trait::async_trait;

use super::frame::{BrokerFrame, ClientFrame};
use super::{ServerFrame, SubscriptionId, Transport, TransportLink};
use crate::error::ChatError;

/// Websocket dialer for the messaging backend.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    heartbeat: Duration,
}

impl WsTransport {
    /// Creates a dialer for `url` with the given heartbeat interval.
    #[must_use]
    pub const fn new(url: String, heartbeat: Duration) -> Self {
        Self { url, heartbeat }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, ChatError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChatError::Transport(format!("websocket handshake: {e}")))?;
        tracing::debug!(url = %self.url, "websocket established");
        Ok(Box::new(WsLink::new(stream, self.heartbeat)))
    }
}

/// One live websocket link.
struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    heartbeat: tokio::time::Interval,
    next_subscription_id: u64,
}

impl WsLink {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, heartbeat: Duration) -> Self {
        let start = tokio::time::Instant::now() + heartbeat;
        Self {
            stream,
            heartbeat: tokio::time::interval_at(start, heartbeat),
            next_subscription_id: 1,
        }
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), ChatError> {
        let json = serde_json::to_string(frame)
            .map_err(|e| ChatError::Transport(format!("encode frame: {e}")))?;
        self.stream
            .send(WsMessage::text(json))
            .await
            .map_err(|e| ChatError::Transport(format!("send frame: {e}")))
    }
}

impl fmt::Debug for WsLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsLink")
            .field("next_subscription_id", &self.next_subscription_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportLink for WsLink {
    async fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, ChatError> {
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        self.send_frame(&ClientFrame::Subscribe {
            id,
            topic: topic.to_string(),
        })
        .await?;
        Ok(SubscriptionId::new(id))
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), ChatError> {
        self.send_frame(&ClientFrame::Unsubscribe { id: id.get() }).await
    }

    async fn publish(
        &mut self,
        destination: &str,
        body: serde_json::Value,
    ) -> Result<(), ChatError> {
        self.send_frame(&ClientFrame::Publish {
            id: uuid::Uuid::new_v4().to_string(),
            destination: destination.to_string(),
            body,
        })
        .await
    }

    async fn next_frame(&mut self) -> Option<Result<ServerFrame, ChatError>> {
        loop {
            tokio::select! {
                message = self.stream.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            return Some(decode_broker_frame(text.as_str()));
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if self.stream.send(WsMessage::Pong(payload)).await.is_err() {
                                return None;
                            }
                        }
                        Some(Ok(WsMessage::Pong(_) | WsMessage::Binary(_) | WsMessage::Frame(_))) => {}
                        Some(Ok(WsMessage::Close(_))) | None => return None,
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "websocket read failed");
                            return None;
                        }
                    }
                }
                _ = self.heartbeat.tick() => {
                    if self.stream.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

fn decode_broker_frame(text: &str) -> Result<ServerFrame, ChatError> {
    let frame: BrokerFrame = serde_json::from_str(text)
        .map_err(|e| ChatError::Protocol(format!("bad broker frame: {e}")))?;
    let BrokerFrame::Message {
        subscription,
        topic,
        body,
    } = frame;
    Ok(ServerFrame {
        subscription: SubscriptionId::new(subscription),
        topic,
        body,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_valid_broker_frame() {
        let text = r#"{"type":"message","subscription":3,"topic":"/topic/chat/7","body":{"x":1}}"#;
        let frame = decode_broker_frame(text);
        let Ok(frame) = frame else {
            panic!("expected frame to decode");
        };
        assert_eq!(frame.subscription, SubscriptionId::new(3));
        assert_eq!(frame.topic, "/topic/chat/7");
        assert_eq!(frame.body, json!({"x": 1}));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = decode_broker_frame("not json at all");
        assert!(matches!(result, Err(ChatError::Protocol(_))));
    }
}
