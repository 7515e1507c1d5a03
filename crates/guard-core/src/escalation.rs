//! The seam between components that detect trouble and whatever tells humans about it.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::NotificationEvent;

/// Receiver of operator escalations.
///
/// Implementations must swallow their own failures: callers on the trading
/// path never handle a notification error.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate_event(&self, kind: &str, message: &str);
}

/// In-memory sink for testing.
#[derive(Default)]
pub struct MemorySink {
    events: RwLock<Vec<NotificationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn count_kind(&self, kind: &str) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl EscalationSink for MemorySink {
    async fn escalate_event(&self, kind: &str, message: &str) {
        self.events
            .write()
            .await
            .push(NotificationEvent::new(kind, message));
    }
}
