use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::safe_copy::safe_alert;
use crate::ai::PatternAnalysis;
use crate::alerts::{Alert, AlertEvent, AlertStore};

/// Subscription channel receiving pattern analysis results
pub const ALERT_PATTERNS_CHANNEL: &str = "alert_patterns";

pub type ClientId = u64;

/// Message sent to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Connection established
    #[serde(rename = "connected")]
    Connected { message: String },
    /// Snapshot of every active alert, sent on connect
    #[serde(rename = "active_alerts")]
    ActiveAlerts { alerts: Vec<Value> },
    /// New alert
    #[serde(rename = "alert")]
    Alert { alert: Value },
    /// Alert enriched or acknowledged
    #[serde(rename = "alert_update")]
    AlertUpdate { alert: Value },
    /// Alert resolved
    #[serde(rename = "resolve")]
    Resolve { alert: Value },
    /// Pattern analysis result, only for subscribers of [`ALERT_PATTERNS_CHANNEL`]
    #[serde(rename = "alert_patterns")]
    AlertPatterns { analysis: PatternAnalysis },
    /// Subscription acknowledged
    #[serde(rename = "subscribed")]
    Subscribed { channel: String },
    /// Error message
    #[serde(rename = "error")]
    Error { message: String },
}

/// Message received from WebSocket clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

struct ClientHandle {
    sender: mpsc::Sender<WsMessage>,
    channels: HashSet<String>,
}

/// Registry of connected realtime clients. Every client has its own bounded
/// queue; a client whose queue is closed or full is dropped from the set.
pub struct RealtimeHub {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
    alerts: Arc<AlertStore>,
    client_buffer: usize,
    max_metrics_bytes: usize,
}

impl RealtimeHub {
    pub fn new(alerts: Arc<AlertStore>, client_buffer: usize, max_metrics_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            alerts,
            client_buffer: client_buffer.max(2),
            max_metrics_bytes,
        })
    }

    fn safe(&self, alert: &Alert) -> Value {
        safe_alert(alert, self.max_metrics_bytes)
    }

    /// Register a client and queue the active-alerts snapshot for it. The
    /// registry stays locked while the snapshot is taken, so an alert created
    /// meanwhile shows up in the snapshot or in a later broadcast.
    pub async fn connect(&self) -> (ClientId, mpsc::Receiver<WsMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.client_buffer);

        let mut clients = self.clients.write().await;
        let alerts: Vec<Value> = self
            .alerts
            .get_active()
            .await
            .iter()
            .map(|alert| self.safe(alert))
            .collect();
        let _ = sender.try_send(WsMessage::Connected {
            message: "Connected to alert stream".to_string(),
        });
        let _ = sender.try_send(WsMessage::ActiveAlerts { alerts });

        clients.insert(
            id,
            ClientHandle {
                sender,
                channels: HashSet::new(),
            },
        );
        info!(client_id = id, total = clients.len(), "Realtime client connected");
        (id, receiver)
    }

    pub async fn disconnect(&self, id: ClientId) -> bool {
        let removed = self.clients.write().await.remove(&id).is_some();
        if removed {
            info!(client_id = id, "Realtime client disconnected");
        }
        removed
    }

    pub async fn subscribe(&self, id: ClientId, channel: &str) -> bool {
        match self.clients.write().await.get_mut(&id) {
            Some(client) => {
                client.channels.insert(channel.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe(&self, id: ClientId, channel: &str) -> bool {
        match self.clients.write().await.get_mut(&id) {
            Some(client) => client.channels.remove(channel),
            None => false,
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_connected(&self, id: ClientId) -> bool {
        self.clients.read().await.contains_key(&id)
    }

    /// Push a lifecycle event to clients. Returns the number of clients the
    /// message was queued for; failures only ever remove clients.
    pub async fn broadcast_event(&self, event: &AlertEvent) -> usize {
        match event {
            AlertEvent::Created(alert) => self.broadcast(WsMessage::Alert { alert: self.safe(alert) }).await,
            AlertEvent::Updated(alert) => {
                self.broadcast(WsMessage::AlertUpdate { alert: self.safe(alert) })
                    .await
            }
            AlertEvent::Resolved(alert) => self.broadcast(WsMessage::Resolve { alert: self.safe(alert) }).await,
            AlertEvent::PatternsDetected(analysis) => {
                self.broadcast_to_channel(
                    ALERT_PATTERNS_CHANNEL,
                    WsMessage::AlertPatterns {
                        analysis: analysis.clone(),
                    },
                )
                .await
            }
        }
    }

    pub async fn broadcast(&self, message: WsMessage) -> usize {
        self.deliver(message, None).await
    }

    pub async fn broadcast_to_channel(&self, channel: &str, message: WsMessage) -> usize {
        self.deliver(message, Some(channel)).await
    }

    /// Queue a message for a single client
    pub async fn send_to(&self, id: ClientId, message: WsMessage) -> bool {
        let result = match self.clients.read().await.get(&id) {
            Some(client) => client.sender.try_send(message),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.drop_clients(&[id], failure_reason(&e)).await;
                false
            }
        }
    }

    async fn deliver(&self, message: WsMessage, channel: Option<&str>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        let mut reason = "";

        {
            let clients = self.clients.read().await;
            for (id, client) in clients.iter() {
                if let Some(channel) = channel {
                    if !client.channels.contains(channel) {
                        continue;
                    }
                }
                match client.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        reason = failure_reason(&e);
                        failed.push(*id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            self.drop_clients(&failed, reason).await;
        }
        delivered
    }

    /// Dropping a client's sender ends its socket writer, which closes the
    /// connection.
    async fn drop_clients(&self, ids: &[ClientId], reason: &str) {
        let mut clients = self.clients.write().await;
        for id in ids {
            if clients.remove(id).is_some() {
                warn!(client_id = id, reason, "Dropping realtime client");
            }
        }
    }

    /// Handle a text frame sent by a client
    pub async fn handle_client_message(&self, id: ClientId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { channel }) => {
                if self.subscribe(id, &channel).await {
                    debug!(client_id = id, channel = %channel, "Client subscribed");
                    self.send_to(id, WsMessage::Subscribed { channel }).await;
                }
            }
            Ok(ClientMessage::Unsubscribe { channel }) => {
                self.unsubscribe(id, &channel).await;
            }
            Err(e) => {
                self.send_to(
                    id,
                    WsMessage::Error {
                        message: format!("Unrecognized message: {}", e),
                    },
                )
                .await;
            }
        }
    }
}

fn failure_reason<T>(error: &TrySendError<T>) -> &'static str {
    match error {
        TrySendError::Full(_) => "send queue full",
        TrySendError::Closed(_) => "connection closed",
    }
}

/// Handle an individual WebSocket connection
pub async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (client_id, mut queue) = hub.connect().await;

    // Send queued messages to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(client_id, error = %e, "Failed to encode realtime message"),
            }
        }
        let _ = sender.close().await;
    });

    // Handle incoming subscription requests
    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => recv_hub.handle_client_message(client_id, &text).await,
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    error!(client_id, error = %e, "WebSocket receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut recv_task => {
            send_task.abort();
        }
        _ = &mut send_task => {
            recv_task.abort();
        }
    }

    hub.disconnect(client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AlertPattern;
    use crate::alerts::CreateOutcome;
    use crate::rules::Rule;
    use serde_json::json;

    fn rule(id: &str) -> Rule {
        serde_json::from_value(json!({
            "id": id, "name": id, "type": "threshold",
            "query": "value", "condition": ">", "threshold": 1
        }))
        .unwrap()
    }

    async fn created(store: &AlertStore, id: &str) -> Alert {
        match store.create(&rule(id), "all", 5.0, json!({ "value": 5 })).await {
            CreateOutcome::Created(alert) | CreateOutcome::Existing(alert) => alert,
        }
    }

    #[tokio::test]
    async fn test_connect_sends_active_alert_snapshot() {
        let store = AlertStore::new(10);
        created(&store, "a").await;
        created(&store, "b").await;
        let hub = RealtimeHub::new(store, 8, 1024);

        let (_id, mut rx) = hub.connect().await;
        assert!(matches!(rx.recv().await, Some(WsMessage::Connected { .. })));
        match rx.recv().await {
            Some(WsMessage::ActiveAlerts { alerts }) => assert_eq!(alerts.len(), 2),
            other => panic!("expected active alerts, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_alert_created_during_connect_is_not_lost() {
        for round in 0..50 {
            let store = AlertStore::new(10);
            let hub = RealtimeHub::new(store.clone(), 8, 1024);

            let publisher = {
                let hub = hub.clone();
                tokio::spawn(async move {
                    let alert = created(&store, "a").await;
                    hub.broadcast_event(&AlertEvent::Created(alert.clone())).await;
                    alert.id
                })
            };
            let (_id, mut rx) = hub.connect().await;
            let alert_id = json!(publisher.await.unwrap());

            let seen = std::iter::from_fn(|| rx.try_recv().ok()).any(|message| match message {
                WsMessage::ActiveAlerts { alerts } => alerts.iter().any(|a| a["id"] == alert_id),
                WsMessage::Alert { alert } => alert["id"] == alert_id,
                _ => false,
            });
            assert!(seen, "alert missed by client in round {}", round);
        }
    }

    #[tokio::test]
    async fn test_failed_client_is_removed_others_keep_receiving() {
        let store = AlertStore::new(10);
        let hub = RealtimeHub::new(store.clone(), 8, 1024);

        let (healthy, mut healthy_rx) = hub.connect().await;
        let (broken, broken_rx) = hub.connect().await;
        drop(broken_rx);

        let alert = created(&store, "a").await;
        let delivered = hub.broadcast_event(&AlertEvent::Created(alert.clone())).await;
        assert_eq!(delivered, 1);
        assert!(!hub.is_connected(broken).await);
        assert!(hub.is_connected(healthy).await);

        hub.broadcast_event(&AlertEvent::Resolved(alert)).await;

        let mut types = Vec::new();
        while let Ok(message) = healthy_rx.try_recv() {
            types.push(serde_json::to_value(&message).unwrap()["type"].clone());
        }
        assert_eq!(
            types,
            vec![json!("connected"), json!("active_alerts"), json!("alert"), json!("resolve")]
        );
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped_when_queue_fills() {
        let store = AlertStore::new(10);
        let hub = RealtimeHub::new(store.clone(), 2, 1024);
        let (slow, _slow_rx) = hub.connect().await;

        let alert = created(&store, "a").await;
        hub.broadcast_event(&AlertEvent::Updated(alert)).await;

        assert!(!hub.is_connected(slow).await);
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_patterns_only_reach_subscribers() {
        let store = AlertStore::new(10);
        let hub = RealtimeHub::new(store, 8, 1024);
        let (subscriber, mut subscriber_rx) = hub.connect().await;
        let (_other, mut other_rx) = hub.connect().await;

        hub
            .handle_client_message(subscriber, r#"{"type":"subscribe","channel":"alert_patterns"}"#)
            .await;

        let analysis = PatternAnalysis {
            patterns: vec![AlertPattern {
                description: "nightly cpu spikes".to_string(),
                frequency: Some(7),
                rule_ids: vec!["cpu_high".to_string()],
            }],
            insights: Vec::new(),
        };
        let delivered = hub.broadcast_event(&AlertEvent::PatternsDetected(analysis)).await;
        assert_eq!(delivered, 1);

        let received: Vec<WsMessage> = std::iter::from_fn(|| subscriber_rx.try_recv().ok()).collect();
        assert!(matches!(received.last(), Some(WsMessage::AlertPatterns { .. })));
        assert!(received.iter().any(|m| matches!(m, WsMessage::Subscribed { .. })));

        let other: Vec<WsMessage> = std::iter::from_fn(|| other_rx.try_recv().ok()).collect();
        assert!(!other.iter().any(|m| matches!(m, WsMessage::AlertPatterns { .. })));
    }

    #[tokio::test]
    async fn test_invalid_client_message_gets_error_reply() {
        let hub = RealtimeHub::new(AlertStore::new(10), 8, 1024);
        let (id, mut rx) = hub.connect().await;

        hub.handle_client_message(id, "not json").await;

        let received: Vec<WsMessage> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(received.last(), Some(WsMessage::Error { .. })));
    }
}
