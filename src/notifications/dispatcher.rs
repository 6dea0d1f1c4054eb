use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::channels::{ChannelType, NotificationChannel};
use super::templates::{render, RenderedMessage};
use super::transport::{ChannelError, NotificationTransport, OutboundNotification, SmtpSettings};
use crate::ai::{EnrichmentPipeline, PatternAnalysis};
use crate::alerts::{Alert, AlertEvent, AlertStatus};
use crate::realtime::RealtimeHub;
use crate::rules::{RuleStore, Severity};

/// Per-event delivery counts across all enabled channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum ChannelOutcome {
    Delivered,
    Skipped,
}

/// Fans lifecycle events out to every enabled notification channel
pub struct NotificationDispatcher {
    rules: Arc<RuleStore>,
    hub: Arc<RealtimeHub>,
    enrichment: Arc<EnrichmentPipeline>,
    transport: Arc<dyn NotificationTransport>,
}

impl NotificationDispatcher {
    pub fn new(
        rules: Arc<RuleStore>,
        hub: Arc<RealtimeHub>,
        enrichment: Arc<EnrichmentPipeline>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rules,
            hub,
            enrichment,
            transport,
        })
    }

    /// Deliver one event to every channel at once. A failing or slow
    /// channel is logged and counted; the others are not held up by it.
    pub async fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        let channels = self.rules.enabled_channels().await;
        let outcomes = join_all(channels.iter().map(|channel| self.dispatch_to(channel, event))).await;

        for (channel, outcome) in channels.iter().zip(outcomes) {
            match outcome {
                Ok(ChannelOutcome::Delivered) => report.delivered += 1,
                Ok(ChannelOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        channel_id = %channel.id,
                        channel_type = channel.channel_type.as_str(),
                        event = event.kind(),
                        error = %e,
                        "Notification channel failed"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            event = event.kind(),
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "Event dispatched"
        );
        report
    }

    async fn dispatch_to(
        &self,
        channel: &NotificationChannel,
        event: &AlertEvent,
    ) -> Result<ChannelOutcome, ChannelError> {
        let alert = match event {
            AlertEvent::Created(alert) | AlertEvent::Updated(alert) | AlertEvent::Resolved(alert) => alert,
            AlertEvent::PatternsDetected(analysis) => return Ok(self.dispatch_patterns(channel, event, analysis).await),
        };

        match channel.channel_type {
            ChannelType::Console => {
                log_alert(channel, event, alert);
                Ok(ChannelOutcome::Delivered)
            }
            ChannelType::Websocket => {
                self.hub.broadcast_event(event).await;
                Ok(ChannelOutcome::Delivered)
            }
            ChannelType::Email | ChannelType::Slack | ChannelType::PagerDuty => {
                if matches!(event, AlertEvent::Updated(_)) {
                    return Ok(ChannelOutcome::Skipped);
                }
                let outbound = build_outbound(channel, alert)?;
                self.transport.deliver(&outbound).await?;
                Ok(ChannelOutcome::Delivered)
            }
            ChannelType::AiFeedback => {
                if !matches!(event, AlertEvent::Created(_)) {
                    return Ok(ChannelOutcome::Skipped);
                }
                if let Some(min_severity) = channel.config.min_severity {
                    if alert.severity < min_severity {
                        return Ok(ChannelOutcome::Skipped);
                    }
                }
                let feedback = channel.config.feedback_type.unwrap_or_default();
                self.enrichment.spawn_feedback(alert.clone(), feedback);
                Ok(ChannelOutcome::Delivered)
            }
        }
    }

    async fn dispatch_patterns(
        &self,
        channel: &NotificationChannel,
        event: &AlertEvent,
        analysis: &PatternAnalysis,
    ) -> ChannelOutcome {
        match channel.channel_type {
            ChannelType::Console => {
                info!(
                    channel_id = %channel.id,
                    patterns = analysis.patterns.len(),
                    insights = analysis.insights.len(),
                    "Alert patterns detected"
                );
                for pattern in &analysis.patterns {
                    info!(
                        frequency = ?pattern.frequency,
                        rules = ?pattern.rule_ids,
                        "Pattern: {}",
                        pattern.description
                    );
                }
                ChannelOutcome::Delivered
            }
            ChannelType::Websocket => {
                self.hub.broadcast_event(event).await;
                ChannelOutcome::Delivered
            }
            _ => ChannelOutcome::Skipped,
        }
    }
}

fn log_alert(channel: &NotificationChannel, event: &AlertEvent, alert: &Alert) {
    let message = alert.summary();
    match alert.severity {
        Severity::Critical | Severity::Error => warn!(
            channel_id = %channel.id,
            event = event.kind(),
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            severity = alert.severity.as_str(),
            source = %alert.source,
            "{}",
            message
        ),
        Severity::Warning | Severity::Info => info!(
            channel_id = %channel.id,
            event = event.kind(),
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            severity = alert.severity.as_str(),
            source = %alert.source,
            "{}",
            message
        ),
    }
}

fn required<'a>(
    channel: &NotificationChannel,
    value: Option<&'a String>,
    setting: &'static str,
) -> Result<&'a String, ChannelError> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| ChannelError::MissingConfig {
        channel: channel.id.clone(),
        setting,
    })
}

/// Build the outbound message for an external channel, checking the
/// settings its type requires
pub fn build_outbound(channel: &NotificationChannel, alert: &Alert) -> Result<OutboundNotification, ChannelError> {
    let config = &channel.config;
    let rendered = render(config.templates.as_ref(), alert);

    match channel.channel_type {
        ChannelType::Email => {
            if config.recipients.is_empty() {
                return Err(ChannelError::MissingConfig {
                    channel: channel.id.clone(),
                    setting: "recipients",
                });
            }
            let host = required(channel, config.smtp_host.as_ref(), "smtpHost")?;
            let from = required(channel, config.from_address.as_ref(), "fromAddress")?;

            let mut smtp = SmtpSettings::new(host.clone(), config.smtp_port);
            smtp.username = config.smtp_username.clone();
            smtp.password = config.smtp_password.clone();
            smtp.use_tls = config.use_tls;

            Ok(OutboundNotification::Email {
                channel: channel.id.clone(),
                smtp,
                from: from.clone(),
                recipients: config.recipients.clone(),
                subject: rendered.subject,
                body: rendered.body,
            })
        }
        ChannelType::Slack => {
            let webhook_url = required(channel, config.webhook_url.as_ref(), "webhookUrl")?;
            let mut payload = slack_payload(alert, &rendered);
            if let Some(slack_channel) = &config.slack_channel {
                payload["channel"] = json!(slack_channel);
            }
            if let Some(username) = &config.username {
                payload["username"] = json!(username);
            }
            Ok(OutboundNotification::Slack {
                channel: channel.id.clone(),
                webhook_url: webhook_url.clone(),
                payload,
            })
        }
        ChannelType::PagerDuty => {
            let routing_key = required(channel, config.routing_key.as_ref(), "routingKey")?;
            Ok(OutboundNotification::PagerDuty {
                channel: channel.id.clone(),
                payload: pagerduty_payload(routing_key, alert, &rendered),
            })
        }
        ChannelType::Console | ChannelType::Websocket | ChannelType::AiFeedback => {
            Err(ChannelError::MissingConfig {
                channel: channel.id.clone(),
                setting: "external transport",
            })
        }
    }
}

fn slack_payload(alert: &Alert, rendered: &RenderedMessage) -> serde_json::Value {
    let color = match (alert.status, alert.severity) {
        (AlertStatus::Resolved, _) => "#28a745",
        (_, Severity::Critical | Severity::Error) => "#dc3545",
        (_, Severity::Warning) => "#ffc107",
        (_, Severity::Info) => "#17a2b8",
    };
    let value = alert
        .value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string());

    json!({
        "text": rendered.subject,
        "attachments": [{
            "color": color,
            "title": rendered.subject,
            "text": rendered.body,
            "fields": [
                { "title": "Severity", "value": alert.severity.as_str(), "short": true },
                { "title": "Source", "value": alert.source, "short": true },
                { "title": "Value", "value": value, "short": true },
                {
                    "title": "Started",
                    "value": alert.starts_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    "short": true
                }
            ],
            "footer": "Kartex Alerting",
            "ts": alert.starts_at.timestamp()
        }]
    })
}

fn pagerduty_payload(routing_key: &str, alert: &Alert, rendered: &RenderedMessage) -> serde_json::Value {
    let event_action = if alert.status == AlertStatus::Resolved {
        "resolve"
    } else {
        "trigger"
    };

    json!({
        "routing_key": routing_key,
        "event_action": event_action,
        "dedup_key": format!("kartex-{}", alert.id),
        "payload": {
            "summary": rendered.subject,
            "source": alert.source,
            "severity": alert.severity.as_str(),
            "timestamp": alert.starts_at.to_rfc3339(),
            "custom_details": {
                "rule_id": alert.rule_id,
                "rule_name": alert.rule_name,
                "value": alert.value,
                "labels": alert.labels,
                "body": rendered.body
            }
        }
    })
}

/// Consume the event bus until shutdown is requested or the bus closes
pub async fn run_dispatch_loop(
    dispatcher: Arc<NotificationDispatcher>,
    mut events: broadcast::Receiver<AlertEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    info!("Notification dispatcher started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Notification dispatcher shutting down");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    dispatcher.dispatch(&event).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Notification dispatcher lagged behind, events dropped");
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed, notification dispatcher stopping");
                    break;
                }
            }
        }
    }
}
