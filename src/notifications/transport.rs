use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel '{channel}' is missing required setting '{setting}'")]
    MissingConfig { channel: String, setting: &'static str },

    #[error("invalid email address '{0}'")]
    InvalidAddress(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} responded with status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("email delivery failed: {0}")]
    Email(String),
}

/// SMTP settings for one email channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

impl SmtpSettings {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port: port.unwrap_or(DEFAULT_SMTP_PORT),
            username: None,
            password: None,
            use_tls: false,
        }
    }
}

/// A fully built outbound message. Channel configuration has already been
/// validated when one of these exists.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundNotification {
    Email {
        channel: String,
        smtp: SmtpSettings,
        from: String,
        recipients: Vec<String>,
        subject: String,
        body: String,
    },
    Slack {
        channel: String,
        webhook_url: String,
        payload: Value,
    },
    PagerDuty {
        channel: String,
        payload: Value,
    },
}

impl OutboundNotification {
    pub fn channel(&self) -> &str {
        match self {
            OutboundNotification::Email { channel, .. }
            | OutboundNotification::Slack { channel, .. }
            | OutboundNotification::PagerDuty { channel, .. } => channel,
        }
    }
}

/// Delivers outbound notifications to external services
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), ChannelError>;
}

/// Transport talking to Slack webhooks, the PagerDuty events API and SMTP
pub struct DeliveryTransport {
    http_client: Client,
}

impl DeliveryTransport {
    pub fn new(timeout: Duration) -> Result<Self, ChannelError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    async fn post_json(&self, service: &'static str, url: &str, payload: &Value) -> Result<(), ChannelError> {
        let response = self.http_client.post(url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("{} request failed: {} - {}", service, status, body);
            return Err(ChannelError::Status {
                service,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn send_email(
        &self,
        smtp: &SmtpSettings,
        from: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), ChannelError> {
        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|_| ChannelError::InvalidAddress(from.to_string()))?;

        let builder = if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .map_err(|e| ChannelError::Email(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        let builder = builder.port(smtp.port);
        let mailer = match (&smtp.username, &smtp.password) {
            (Some(username), Some(password)) => builder
                .credentials(Credentials::new(username.clone(), password.clone()))
                .build(),
            _ => builder.build(),
        };

        for to_address in recipients {
            let to_mailbox: Mailbox = to_address
                .parse()
                .map_err(|_| ChannelError::InvalidAddress(to_address.clone()))?;
            let email = Message::builder()
                .from(from_mailbox.clone())
                .to(to_mailbox)
                .subject(subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.to_string())
                .map_err(|e| ChannelError::Email(e.to_string()))?;

            mailer
                .send(email)
                .await
                .map_err(|e| ChannelError::Email(e.to_string()))?;
            info!("Email notification sent to {}", to_address);
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationTransport for DeliveryTransport {
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), ChannelError> {
        match notification {
            OutboundNotification::Email {
                channel,
                smtp,
                from,
                recipients,
                subject,
                body,
            } => {
                self.send_email(smtp, from, recipients, subject, body).await?;
                info!("Email notification sent for channel {}", channel);
            }
            OutboundNotification::Slack {
                channel,
                webhook_url,
                payload,
            } => {
                self.post_json("Slack webhook", webhook_url, payload).await?;
                info!("Slack notification sent to channel {}", channel);
            }
            OutboundNotification::PagerDuty { channel, payload } => {
                self.post_json("PagerDuty API", PAGERDUTY_EVENTS_URL, payload).await?;
                info!("PagerDuty notification sent to channel {}", channel);
            }
        }
        Ok(())
    }
}

/// Transport that only logs what would have been sent
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn deliver(&self, notification: &OutboundNotification) -> Result<(), ChannelError> {
        match notification {
            OutboundNotification::Email {
                channel,
                recipients,
                subject,
                ..
            } => info!(channel = %channel, recipients = recipients.len(), subject = %subject, "Email notification (dry run)"),
            OutboundNotification::Slack { channel, .. } => {
                info!(channel = %channel, "Slack notification (dry run)")
            }
            OutboundNotification::PagerDuty { channel, payload } => info!(
                channel = %channel,
                action = %payload["event_action"],
                "PagerDuty notification (dry run)"
            ),
        }
        Ok(())
    }
}
