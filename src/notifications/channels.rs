use serde::{Deserialize, Serialize};

use crate::rules::Severity;

/// Notification channel loaded from `{"channels": [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: ChannelConfig,
}

/// Type of notification channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Console,
    Websocket,
    Email,
    Slack,
    #[serde(rename = "pagerduty")]
    PagerDuty,
    AiFeedback,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Console => "console",
            ChannelType::Websocket => "websocket",
            ChannelType::Email => "email",
            ChannelType::Slack => "slack",
            ChannelType::PagerDuty => "pagerduty",
            ChannelType::AiFeedback => "ai_feedback",
        }
    }
}

/// Type-specific channel settings. Which fields are required depends on the
/// channel type and is checked when a notification is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    // Email
    pub recipients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_password: Option<String>,
    pub use_tls: bool,
    // Slack
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    // PagerDuty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    // Shared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates: Option<MessageTemplates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_type: Option<FeedbackType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// Enrichment requested by an `ai_feedback` channel
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    #[default]
    Explanation,
    Recommendation,
    Correlation,
}

fn default_enabled() -> bool {
    true
}

impl NotificationChannel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channel_type,
            enabled: true,
            config: ChannelConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_channels() {
        let slack: NotificationChannel = serde_json::from_value(json!({
            "id": "ops-slack",
            "name": "Ops Slack",
            "type": "slack",
            "config": { "webhookUrl": "https://hooks.slack.test/x", "minSeverity": "error" }
        }))
        .unwrap();
        assert_eq!(slack.channel_type, ChannelType::Slack);
        assert!(slack.enabled);
        assert_eq!(slack.config.webhook_url.as_deref(), Some("https://hooks.slack.test/x"));
        assert_eq!(slack.config.min_severity, Some(Severity::Error));

        let feedback: NotificationChannel = serde_json::from_value(json!({
            "id": "ai", "name": "AI", "type": "ai_feedback", "enabled": false,
            "config": { "feedbackType": "correlation" }
        }))
        .unwrap();
        assert_eq!(feedback.channel_type, ChannelType::AiFeedback);
        assert_eq!(feedback.config.feedback_type, Some(FeedbackType::Correlation));

        let console: NotificationChannel =
            serde_json::from_value(json!({ "id": "c", "name": "Console", "type": "console" })).unwrap();
        assert!(console.config.recipients.is_empty());
    }
}
