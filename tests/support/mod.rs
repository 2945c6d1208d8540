//! Shared test support: a scripted in-memory transport that lets tests
//! drive the conversation core without a broker, and event helpers.

#![allow(dead_code)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use marketplace_chat::domain::ChatEvent;
use marketplace_chat::error::ChatError;
use marketplace_chat::transport::{ServerFrame, SubscriptionId, Transport, TransportLink};

#[derive(Debug, Default)]
struct Shared {
    connect_failures: u32,
    publish_failures: u32,
    links: Vec<LinkRecord>,
}

#[derive(Debug)]
struct LinkRecord {
    inbound_tx: Option<mpsc::UnboundedSender<ServerFrame>>,
    subscriptions: Vec<(u64, String)>,
    published: Vec<(String, serde_json::Value)>,
    alive: bool,
}

/// Transport whose behavior is fully scripted by the test.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` dials fail.
    pub fn fail_next_connects(&self, n: u32) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.connect_failures = n;
        }
    }

    /// Makes the next `n` publishes fail (and thereby kill their link).
    pub fn fail_next_publishes(&self, n: u32) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.publish_failures = n;
        }
    }

    /// Severs the current link; the client should reconnect.
    pub fn drop_link(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            if let Some(link) = shared.links.iter_mut().rev().find(|l| l.alive) {
                link.alive = false;
                link.inbound_tx = None;
            }
        }
    }

    /// Pushes an inbound payload onto the current link's subscription
    /// for `topic`. Returns `false` when no live subscription matches.
    pub fn push(&self, topic: &str, body: serde_json::Value) -> bool {
        let Ok(shared) = self.shared.lock() else {
            return false;
        };
        let Some(link) = shared.links.iter().rev().find(|l| l.alive) else {
            return false;
        };
        let Some(tx) = link.inbound_tx.as_ref() else {
            return false;
        };
        let Some((id, _)) = link.subscriptions.iter().find(|(_, t)| t.as_str() == topic) else {
            return false;
        };
        tx.send(ServerFrame {
            subscription: SubscriptionId::new(*id),
            topic: topic.to_string(),
            body,
        })
        .is_ok()
    }

    /// All payloads published across every link, in order.
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.shared.lock().map_or_else(
            |_| Vec::new(),
            |shared| {
                shared
                    .links
                    .iter()
                    .flat_map(|l| l.published.iter().cloned())
                    .collect()
            },
        )
    }

    /// Topics subscribed on the current link.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.lock().map_or_else(
            |_| Vec::new(),
            |shared| {
                shared
                    .links
                    .iter()
                    .rev()
                    .find(|l| l.alive)
                    .map(|l| l.subscriptions.iter().map(|(_, t)| t.clone()).collect())
                    .unwrap_or_default()
            },
        )
    }

    /// Number of links ever dialed.
    pub fn link_count(&self) -> usize {
        self.shared.lock().map_or(0, |shared| shared.links.len())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, ChatError> {
        let (serial, inbound) = {
            let Ok(mut shared) = self.shared.lock() else {
                return Err(ChatError::Transport("poisoned".to_string()));
            };
            if shared.connect_failures > 0 {
                shared.connect_failures -= 1;
                return Err(ChatError::Transport("scripted dial failure".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            shared.links.push(LinkRecord {
                inbound_tx: Some(tx),
                subscriptions: Vec::new(),
                published: Vec::new(),
                alive: true,
            });
            (shared.links.len() - 1, rx)
        };
        Ok(Box::new(ScriptedLink {
            serial,
            shared: Arc::clone(&self.shared),
            inbound,
            next_subscription: 1,
        }))
    }
}

#[derive(Debug)]
struct ScriptedLink {
    serial: usize,
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
    next_subscription: u64,
}

#[async_trait]
impl TransportLink for ScriptedLink {
    async fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, ChatError> {
        let Ok(mut shared) = self.shared.lock() else {
            return Err(ChatError::Transport("poisoned".to_string()));
        };
        let Some(link) = shared.links.get_mut(self.serial) else {
            return Err(ChatError::Transport("link gone".to_string()));
        };
        if !link.alive {
            return Err(ChatError::Transport("link dead".to_string()));
        }
        let id = self.next_subscription;
        self.next_subscription += 1;
        link.subscriptions.push((id, topic.to_string()));
        Ok(SubscriptionId::new(id))
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), ChatError> {
        let Ok(mut shared) = self.shared.lock() else {
            return Err(ChatError::Transport("poisoned".to_string()));
        };
        let Some(link) = shared.links.get_mut(self.serial) else {
            return Err(ChatError::Transport("link gone".to_string()));
        };
        link.subscriptions.retain(|(sub_id, _)| *sub_id != id.get());
        Ok(())
    }

    async fn publish(
        &mut self,
        destination: &str,
        body: serde_json::Value,
    ) -> Result<(), ChatError> {
        let Ok(mut shared) = self.shared.lock() else {
            return Err(ChatError::Transport("poisoned".to_string()));
        };
        if shared.publish_failures > 0 {
            shared.publish_failures -= 1;
            return Err(ChatError::Transport("scripted publish failure".to_string()));
        }
        let Some(link) = shared.links.get_mut(self.serial) else {
            return Err(ChatError::Transport("link gone".to_string()));
        };
        if !link.alive {
            return Err(ChatError::Transport("link dead".to_string()));
        }
        link.published.push((destination.to_string(), body));
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<ServerFrame, ChatError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            if let Some(link) = shared.links.get_mut(self.serial) {
                link.alive = false;
                link.inbound_tx = None;
            }
        }
    }
}

/// Initializes test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Builds an inbound confirmed-message payload.
pub fn message_body(
    id: i64,
    room_id: i64,
    sender_user_id: i64,
    role: &str,
    content: &str,
    at: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "roomId": room_id,
        "senderUserId": sender_user_id,
        "senderRole": role,
        "content": content,
        "attachments": [],
        "isRead": false,
        "createdAt": at,
    })
}

/// Builds an inbound read-notice payload.
pub fn read_body(room_id: i64, user_id: i64) -> serde_json::Value {
    json!({"type": "READ", "roomId": room_id, "userId": user_id})
}

/// Awaits the first event matching `pred`.
///
/// # Panics
///
/// Panics when the bus closes or thirty (virtual) seconds pass first.
pub async fn wait_event<F>(rx: &mut broadcast::Receiver<ChatEvent>, pred: F) -> ChatEvent
where
    F: Fn(&ChatEvent) -> bool,
{
    let fut = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(30), fut).await {
        Ok(event) => event,
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Polls `cond` until it holds.
///
/// # Panics
///
/// Panics when thirty (virtual) seconds pass first.
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
