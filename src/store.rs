//! Collaborator seams for persistence and auditing.
//!
//! The real system persists alerts, attempts, messages and webhook events in
//! external stores; those collaborators are modeled as traits here so the
//! engine stays independent of any storage backend. The in-memory
//! implementations back the daemon and the test suite.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Alert, DeliveryState, NotificationAttempt, OutboundMessage, WebhookEvent};

/// Persistent alert store. Alerts are never deleted; terminal states are
/// retained for audit.
pub trait AlertStore: Send + Sync {
    fn insert(&self, alert: Alert);
    fn get(&self, id: Uuid) -> Option<Alert>;
    fn update(&self, alert: &Alert);
    /// Alerts with status active or escalated, for the sweep.
    fn open_alerts(&self) -> Vec<Alert>;
}

/// Store for per-(channel, recipient) notification attempts.
pub trait AttemptStore: Send + Sync {
    fn insert(&self, attempt: NotificationAttempt);
    fn update(&self, attempt: &NotificationAttempt);
    fn for_alert(&self, alert_id: Uuid) -> Vec<NotificationAttempt>;
    fn get_by_external_id(&self, external_id: &str) -> Option<NotificationAttempt>;
    /// Atomically advance the attempt known by `external_id`. The check and
    /// the write happen under one lock; concurrent callbacks cannot regress
    /// a state between them. Returns true when the state moved.
    fn advance_by_external_id(&self, external_id: &str, status: DeliveryState) -> bool;
}

/// Store for outbound provider messages.
pub trait MessageStore: Send + Sync {
    fn insert(&self, message: OutboundMessage);
    fn update(&self, message: &OutboundMessage);
    fn get(&self, id: Uuid) -> Option<OutboundMessage>;
    fn get_by_external_id(&self, external_id: &str) -> Option<OutboundMessage>;
    /// Atomically advance the message known by `external_id`. Holding the
    /// write lock across the comparison is what upholds the monotonic
    /// progression under concurrent webhook deliveries. Returns the message
    /// id and whether the state moved; `None` when no message matches.
    fn advance_by_external_id(
        &self,
        external_id: &str,
        status: DeliveryState,
    ) -> Option<(Uuid, bool)>;
    /// Failed messages below the retry cap, oldest first, for the retry
    /// coordinator.
    fn failed_below_retry_count(&self, max_retries: u32) -> Vec<OutboundMessage>;
}

/// Store for the webhook audit trail.
pub trait WebhookEventStore: Send + Sync {
    fn insert(&self, event: WebhookEvent);
    fn update(&self, event: &WebhookEvent);
    fn get(&self, id: Uuid) -> Option<WebhookEvent>;
}

/// One audit trail entry for lifecycle and correlation activity.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: String,
    pub alert_id: Option<Uuid>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: &str, alert_id: Option<Uuid>, detail: String) -> Self {
        Self {
            kind: kind.to_string(),
            alert_id,
            detail,
            at: Utc::now(),
        }
    }
}

/// Audit log sink collaborator.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    inner: RwLock<HashMap<Uuid, Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStore for MemoryAlertStore {
    fn insert(&self, alert: Alert) {
        self.inner.write().unwrap().insert(alert.id, alert);
    }

    fn get(&self, id: Uuid) -> Option<Alert> {
        self.inner.read().unwrap().get(&id).cloned()
    }

    fn update(&self, alert: &Alert) {
        self.inner.write().unwrap().insert(alert.id, alert.clone());
    }

    fn open_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .inner
            .read()
            .unwrap()
            .values()
            .filter(|a| a.is_open())
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }
}

#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    inner: RwLock<Vec<NotificationAttempt>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<NotificationAttempt> {
        self.inner.read().unwrap().clone()
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn insert(&self, attempt: NotificationAttempt) {
        self.inner.write().unwrap().push(attempt);
    }

    fn update(&self, attempt: &NotificationAttempt) {
        let mut attempts = self.inner.write().unwrap();
        if let Some(existing) = attempts.iter_mut().find(|a| a.id == attempt.id) {
            *existing = attempt.clone();
        }
    }

    fn for_alert(&self, alert_id: Uuid) -> Vec<NotificationAttempt> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.alert_id == alert_id)
            .cloned()
            .collect()
    }

    fn get_by_external_id(&self, external_id: &str) -> Option<NotificationAttempt> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .find(|a| a.external_id.as_deref() == Some(external_id))
            .cloned()
    }

    fn advance_by_external_id(&self, external_id: &str, status: DeliveryState) -> bool {
        let mut attempts = self.inner.write().unwrap();
        match attempts
            .iter_mut()
            .find(|a| a.external_id.as_deref() == Some(external_id))
        {
            Some(attempt) => attempt.advance(status),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    inner: RwLock<Vec<OutboundMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<OutboundMessage> {
        self.inner.read().unwrap().clone()
    }
}

impl MessageStore for MemoryMessageStore {
    fn insert(&self, message: OutboundMessage) {
        self.inner.write().unwrap().push(message);
    }

    fn update(&self, message: &OutboundMessage) {
        let mut messages = self.inner.write().unwrap();
        if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message.clone();
        }
    }

    fn get(&self, id: Uuid) -> Option<OutboundMessage> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    fn get_by_external_id(&self, external_id: &str) -> Option<OutboundMessage> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned()
    }

    fn advance_by_external_id(
        &self,
        external_id: &str,
        status: DeliveryState,
    ) -> Option<(Uuid, bool)> {
        let mut messages = self.inner.write().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.external_id.as_deref() == Some(external_id))?;
        let advanced = message.advance(status);
        Some((message.id, advanced))
    }

    fn failed_below_retry_count(&self, max_retries: u32) -> Vec<OutboundMessage> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .filter(|m| {
                m.state == crate::model::DeliveryState::Failed && m.retry_count < max_retries
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryWebhookEventStore {
    inner: RwLock<HashMap<Uuid, WebhookEvent>>,
}

impl MemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<WebhookEvent> {
        self.inner.read().unwrap().values().cloned().collect()
    }
}

impl WebhookEventStore for MemoryWebhookEventStore {
    fn insert(&self, event: WebhookEvent) {
        self.inner.write().unwrap().insert(event.id, event);
    }

    fn update(&self, event: &WebhookEvent) {
        self.inner.write().unwrap().insert(event.id, event.clone());
    }

    fn get(&self, id: Uuid) -> Option<WebhookEvent> {
        self.inner.read().unwrap().get(&id).cloned()
    }
}

/// Audit sink that keeps events in memory and mirrors them to the log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    inner: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<AuditEvent> {
        self.inner.read().unwrap().clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        tracing::debug!(
            kind = %event.kind,
            alert_id = ?event.alert_id,
            detail = %event.detail,
            "Audit event"
        );
        self.inner.write().unwrap().push(event);
    }
}
