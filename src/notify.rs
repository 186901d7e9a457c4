//! Outbound notifications about scan and payment events.
//!
//! Delivery is best-effort: every send is bounded by a timeout and
//! failures are logged. No lifecycle transition ever waits on or fails
//! because of a notification.

use crate::error::NotifyError;
use crate::models::{PaidTier, ScanTier};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// An event worth telling the requester about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ScanStarted {
        scan_id: Uuid,
        requester: String,
        target: String,
        tier: ScanTier,
    },
    ScanCompleted {
        scan_id: Uuid,
        requester: String,
        target: String,
        findings_count: usize,
    },
    ScanFailed {
        scan_id: Uuid,
        requester: String,
        target: String,
        reason: String,
    },
    PaymentReceived {
        scan_id: Uuid,
        requester: String,
        tier: PaidTier,
    },
    UpgradeStarted {
        scan_id: Uuid,
        parent_id: Uuid,
        requester: String,
        target: String,
        tier: ScanTier,
    },
}

impl Notification {
    pub fn scan_id(&self) -> Uuid {
        match self {
            Notification::ScanStarted { scan_id, .. }
            | Notification::ScanCompleted { scan_id, .. }
            | Notification::ScanFailed { scan_id, .. }
            | Notification::PaymentReceived { scan_id, .. }
            | Notification::UpgradeStarted { scan_id, .. } => *scan_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ScanStarted { .. } => "scan_started",
            Notification::ScanCompleted { .. } => "scan_completed",
            Notification::ScanFailed { .. } => "scan_failed",
            Notification::PaymentReceived { .. } => "payment_received",
            Notification::UpgradeStarted { .. } => "upgrade_started",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            "Notification {} for scan {}",
            notification.kind(),
            notification.scan_id()
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fire-and-forget front for a notifier.
#[derive(Clone)]
pub struct Notifications {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Notifications {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Notifications that are only logged.
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogNotifier), Duration::from_secs(10))
    }

    /// Delivers a notification, logging any failure.
    pub async fn emit(&self, notification: Notification) {
        let result = match tokio::time::timeout(self.timeout, self.notifier.send(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout),
        };

        if let Err(e) = result {
            warn!(
                "Failed to deliver {} notification for scan {}: {}",
                notification.kind(),
                notification.scan_id(),
                e
            );
        }
    }

    /// Delivers a notification on a background task and returns at once.
    pub async fn dispatch(&self, notification: Notification) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.emit(notification).await });

        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Waits for every dispatched notification to be delivered or time out.
    pub async fn flush(&self) {
        let handles = {
            let mut guard = self.in_flight.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Notification task ended abnormally: {}", e);
            }
        }
    }
}
