//! Escalation fan-out across every configured channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::FutureExt;
use guard_core::config::NotifierConfig;
use guard_core::{EscalationSink, NotificationEvent};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::channels::{self, ChannelError, NotificationChannel};
use crate::fallback::PanicLog;

/// Result of one delivery attempt on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    /// Channel has no credentials; skipped silently.
    NotAttempted,
    Failed(String),
}

/// Last known state of a channel, for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    pub channel: String,
    pub status: DeliveryStatus,
    pub updated_at: DateTime<Utc>,
}

/// What happened to one escalation.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub event: NotificationEvent,
    pub outcomes: Vec<(String, DeliveryStatus)>,
    pub fallback_written: bool,
}

impl DispatchReport {
    pub fn delivered(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, status)| *status == DeliveryStatus::Delivered)
    }
}

/// Multi-channel notifier of last resort.
///
/// Never returns an error to its caller. If no channel delivers, including the
/// case where none is configured, the event goes to the PANIC log and stderr.
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    fallback: PanicLog,
    channel_timeout: Duration,
    health: DashMap<&'static str, ChannelHealth>,
}

impl Notifier {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        fallback: PanicLog,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            channels,
            fallback,
            channel_timeout,
            health: DashMap::new(),
        }
    }

    /// Build the standard Telegram/email/Slack set from configuration.
    pub fn from_config(config: &NotifierConfig) -> Result<Self, ChannelError> {
        let channels = channels::from_config(config)?;
        let configured: Vec<_> = channels
            .iter()
            .filter(|c| c.is_configured())
            .map(|c| c.name())
            .collect();
        info!(channels = ?configured, "Notifier initialized");

        Ok(Self::new(
            channels,
            PanicLog::new(config.panic_log_path.clone()),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Send `message` to every channel independently.
    pub async fn dispatch(&self, kind: &str, message: &str) -> DispatchReport {
        let event = NotificationEvent::new(kind, message);
        let text = event.headline();

        let attempts = self.channels.iter().map(|channel| {
            let text = text.as_str();
            async move {
                let status = self.attempt(channel.as_ref(), text).await;
                (channel.name(), status)
            }
        });
        let results = join_all(attempts).await;

        let now = Utc::now();
        for (name, status) in &results {
            self.health.insert(
                *name,
                ChannelHealth {
                    channel: name.to_string(),
                    status: status.clone(),
                    updated_at: now,
                },
            );
        }

        let mut report = DispatchReport {
            event,
            outcomes: results
                .into_iter()
                .map(|(name, status)| (name.to_string(), status))
                .collect(),
            fallback_written: false,
        };

        if !report.delivered() {
            report.fallback_written = self.write_fallback(&report.event).await;
        }
        report
    }

    async fn attempt(&self, channel: &dyn NotificationChannel, text: &str) -> DeliveryStatus {
        if !channel.is_configured() {
            return DeliveryStatus::NotAttempted;
        }

        let send = AssertUnwindSafe(channel.send(text)).catch_unwind();
        match tokio::time::timeout(self.channel_timeout, send).await {
            Ok(Ok(Ok(()))) => DeliveryStatus::Delivered,
            Ok(Ok(Err(e))) => {
                warn!(channel = channel.name(), error = %e, "Notification channel failed");
                DeliveryStatus::Failed(e.to_string())
            }
            Ok(Err(_)) => {
                warn!(channel = channel.name(), "Notification channel panicked");
                DeliveryStatus::Failed("channel panicked".to_string())
            }
            Err(_) => {
                warn!(
                    channel = channel.name(),
                    timeout_ms = self.channel_timeout.as_millis() as u64,
                    "Notification channel timed out"
                );
                DeliveryStatus::Failed("timed out".to_string())
            }
        }
    }

    async fn write_fallback(&self, event: &NotificationEvent) -> bool {
        error!(
            kind = %event.kind,
            path = %self.fallback.path().display(),
            "No notification channel delivered, writing PANIC log"
        );
        eprintln!("[PANIC] {}: {}", event.kind.to_uppercase(), event.message);

        match self.fallback.append(event).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to write PANIC log");
                false
            }
        }
    }

    /// Last delivery outcome per channel that has been exercised.
    pub fn health(&self) -> Vec<ChannelHealth> {
        let mut health: Vec<_> = self.health.iter().map(|e| e.value().clone()).collect();
        health.sort_by(|a, b| a.channel.cmp(&b.channel));
        health
    }

    pub fn configured_channels(&self) -> Vec<&'static str> {
        self.channels
            .iter()
            .filter(|c| c.is_configured())
            .map(|c| c.name())
            .collect()
    }
}

#[async_trait]
impl EscalationSink for Notifier {
    async fn escalate_event(&self, kind: &str, message: &str) {
        self.dispatch(kind, message).await;
    }
}
