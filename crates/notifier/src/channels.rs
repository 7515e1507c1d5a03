//! Delivery channels for operator alerts.

use async_trait::async_trait;
use guard_core::config::NotifierConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Channel delivery errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Never carries the request URL, which holds credentials for Telegram and Slack.
    #[error("HTTP request error: {0}")]
    Http(reqwest::Error),

    #[error("{channel} rejected the message with status {status}")]
    Rejected { channel: &'static str, status: u16 },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// A single outbound alert channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether credentials are present. Unconfigured channels are skipped, not failed.
    fn is_configured(&self) -> bool;

    async fn send(&self, text: &str) -> Result<(), ChannelError>;
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn check_status(channel: &'static str, response: reqwest::Response) -> Result<(), ChannelError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ChannelError::Rejected {
            channel,
            status: status.as_u16(),
        })
    }
}

/// Telegram bot API.
pub struct TelegramChannel {
    http: reqwest::Client,
    token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
}

impl TelegramChannel {
    pub fn new(http: reqwest::Client, token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            http,
            token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    /// Point at a different API host (proxies, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn is_configured(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let (Some(token), Some(chat_id)) = (&self.token, &self.chat_id) else {
            return Err(ChannelError::NotConfigured("telegram"));
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await?;
        check_status("telegram", response)?;

        debug!("Sent Telegram alert");
        Ok(())
    }
}

/// Slack incoming webhook.
pub struct SlackChannel {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackChannel {
    pub fn new(http: reqwest::Client, webhook_url: Option<String>) -> Self {
        Self { http, webhook_url }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let Some(webhook_url) = &self.webhook_url else {
            return Err(ChannelError::NotConfigured("slack"));
        };

        let response = self
            .http
            .post(webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        check_status("slack", response)?;

        debug!("Sent Slack alert");
        Ok(())
    }
}

/// Email through a transactional HTTP API (Resend-compatible).
pub struct EmailChannel {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

impl EmailChannel {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        api_key: Option<String>,
        from: Option<String>,
        to: Option<String>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            api_key,
            from,
            to,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.from.is_some() && self.to.is_some()
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let (Some(api_key), Some(from), Some(to)) = (&self.api_key, &self.from, &self.to) else {
            return Err(ChannelError::NotConfigured("email"));
        };
        let subject: String = text.lines().next().unwrap_or(text).chars().take(120).collect();

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "from": from,
                "to": [to],
                "subject": subject,
                "text": text,
            }))
            .send()
            .await?;
        check_status("email", response)?;

        debug!("Sent email alert");
        Ok(())
    }
}

/// Build the standard channel set. Blank credentials count as unconfigured.
pub fn from_config(
    config: &NotifierConfig,
) -> Result<Vec<Arc<dyn NotificationChannel>>, ChannelError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    Ok(vec![
        Arc::new(TelegramChannel::new(
            http.clone(),
            non_empty(&config.telegram_token),
            non_empty(&config.telegram_chat_id),
        )),
        Arc::new(EmailChannel::new(
            http.clone(),
            config.email_api_url.clone(),
            non_empty(&config.email_api_key),
            non_empty(&config.email_from),
            non_empty(&config.email_to),
        )),
        Arc::new(SlackChannel::new(http, non_empty(&config.slack_webhook))),
    ])
}
