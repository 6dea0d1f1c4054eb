use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::models::Alert;
use crate::ai::PatternAnalysis;

/// Alert lifecycle event delivered to the dispatcher and other subscribers
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Created(Alert),
    Updated(Alert),
    Resolved(Alert),
    PatternsDetected(PatternAnalysis),
}

impl AlertEvent {
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            AlertEvent::Created(alert) | AlertEvent::Updated(alert) | AlertEvent::Resolved(alert) => {
                Some(alert)
            }
            AlertEvent::PatternsDetected(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::Created(_) => "created",
            AlertEvent::Updated(_) => "updated",
            AlertEvent::Resolved(_) => "resolved",
            AlertEvent::PatternsDetected(_) => "patterns_detected",
        }
    }
}

/// Fan-out of lifecycle events to every subscriber
pub struct EventBus {
    sender: broadcast::Sender<AlertEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn publish(&self, event: AlertEvent) {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            debug!("No subscribers for {} event", kind);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }
}
