//! Core domain entities: alerts, notification attempts, outbound provider
//! messages and webhook events.
//!
//! The structs here carry their own invariants: delivery states only move
//! forward, escalation levels never decrease, and lifecycle timestamps are
//! set at most once. Mutation happens through the methods on each type so
//! callers cannot bypass those rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// All severities, most urgent first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status.
///
/// Transitions are restricted: active -> {acknowledged, resolved, escalated},
/// escalated -> {acknowledged, resolved}, acknowledged -> resolved.
/// Resolved and closed are terminal and retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Closed,
    Escalated,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Closed => "closed",
            AlertStatus::Escalated => "escalated",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification channel.
///
/// `Sms` is declared but has no implementation; dispatching to it produces
/// a failed attempt without any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Whatsapp,
    Push,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Whatsapp => "whatsapp",
            Channel::Push => "push",
            Channel::Sms => "sms",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery progression shared by notification attempts and outbound
/// provider messages.
///
/// The non-failed states form a total order `pending < sent < delivered <
/// read`. `Failed` is reachable from any non-failed state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    /// Position in the progression order; `None` for `Failed`.
    fn rank(&self) -> Option<u8> {
        match self {
            DeliveryState::Pending => Some(0),
            DeliveryState::Sent => Some(1),
            DeliveryState::Delivered => Some(2),
            DeliveryState::Read => Some(3),
            DeliveryState::Failed => None,
        }
    }

    /// Whether a transition to `next` is a genuine forward move.
    ///
    /// Callbacks reporting the current or an earlier state are no-ops, which
    /// makes correlation idempotent under duplicate webhook deliveries.
    pub fn can_advance_to(&self, next: DeliveryState) -> bool {
        match (self.rank(), next.rank()) {
            // Failed is terminal.
            (None, _) => false,
            // Anything non-failed may fail.
            (Some(_), None) => true,
            (Some(cur), Some(nxt)) => nxt > cur,
        }
    }

    /// Parse a provider status string from a webhook callback.
    pub fn from_provider_status(s: &str) -> Option<DeliveryState> {
        match s {
            "sent" => Some(DeliveryState::Sent),
            "delivered" => Some(DeliveryState::Delivered),
            "read" => Some(DeliveryState::Read),
            "failed" => Some(DeliveryState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Read => "read",
            DeliveryState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored-infrastructure alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub alert_type: String,
    pub source_type: String,
    pub source_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub escalation_level: usize,
    pub notification_count: u32,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_escalated_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

impl Alert {
    pub fn new(
        title: String,
        description: String,
        severity: Severity,
        alert_type: String,
        source_type: String,
        source_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            severity,
            status: AlertStatus::Active,
            alert_type,
            source_type,
            source_id,
            tags: Vec::new(),
            metadata,
            escalation_level: 0,
            notification_count: 0,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
            last_escalated_at: None,
            resolution_notes: None,
        }
    }

    /// Whether the alert still participates in escalation sweeps.
    pub fn is_open(&self) -> bool {
        matches!(self.status, AlertStatus::Active | AlertStatus::Escalated)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed time since creation; only this drives escalation thresholds.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// One delivery attempt for one (channel, recipient) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub status: DeliveryState,
    pub message: String,
    pub retry_count: u32,
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NotificationAttempt {
    pub fn new(alert_id: Uuid, channel: Channel, recipient: String, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            channel,
            recipient,
            status: DeliveryState::Pending,
            message,
            retry_count: 0,
            external_id: None,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
        }
    }

    pub fn mark_sent(&mut self, external_id: Option<String>) {
        self.status = DeliveryState::Sent;
        self.external_id = external_id;
        self.sent_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = DeliveryState::Failed;
        self.error = Some(error);
    }

    /// Advance delivery state from a correlated webhook callback.
    /// Returns false when the callback reports the current or an earlier
    /// state (no-op).
    pub fn advance(&mut self, next: DeliveryState) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        if next == DeliveryState::Delivered {
            self.delivered_at = Some(Utc::now());
        }
        true
    }
}

/// A templated message handed to the remote messaging provider.
///
/// Created `Pending` for each send attempt, advanced to `Sent` on 2xx
/// acceptance, then to `Delivered`/`Read` (or `Failed`) strictly via webhook
/// correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub recipient: String,
    pub template_id: String,
    pub parameters: Vec<String>,
    pub state: DeliveryState,
    pub phone_number_used: Option<String>,
    pub retry_count: u32,
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        recipient: String,
        template_id: String,
        parameters: Vec<String>,
        context: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient,
            template_id,
            parameters,
            state: DeliveryState::Pending,
            phone_number_used: None,
            retry_count: 0,
            external_id: None,
            error_message: None,
            context,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_sent(&mut self, external_id: String, phone_number_used: String) {
        self.state = DeliveryState::Sent;
        self.external_id = Some(external_id);
        self.phone_number_used = Some(phone_number_used);
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = DeliveryState::Failed;
        self.error_message = Some(error);
        self.updated_at = Utc::now();
    }

    /// Monotonic state advance driven by webhook correlation.
    /// Returns false for no-op callbacks (duplicate or regressing states).
    pub fn advance(&mut self, next: DeliveryState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Processing status of a persisted webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Received,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    fn rank(&self) -> u8 {
        match self {
            ProcessingStatus::Received => 0,
            ProcessingStatus::Queued => 1,
            ProcessingStatus::Processing => 2,
            ProcessingStatus::Completed => 3,
            ProcessingStatus::Failed => 4,
        }
    }
}

/// Maximum number of failed -> processing retries for one webhook event.
pub const MAX_WEBHOOK_RETRIES: u32 = 3;

/// Audit record of one inbound provider callback.
///
/// Persisted for every callback regardless of parse success; the raw payload
/// is immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub source: String,
    pub endpoint: String,
    pub raw_payload: String,
    pub parsed_payload: Option<serde_json::Value>,
    pub concession_code: Option<String>,
    pub external_message_id: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    pub fn new(source: String, endpoint: String, raw_payload: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            endpoint,
            raw_payload,
            parsed_payload: None,
            concession_code: None,
            external_message_id: None,
            processing_status: ProcessingStatus::Received,
            error_message: None,
            retry_count: 0,
            related_entity_type: None,
            related_entity_id: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Advance processing status strictly forward. Returns false for
    /// regressing transitions.
    pub fn advance_status(&mut self, next: ProcessingStatus) -> bool {
        if next.rank() <= self.processing_status.rank() {
            return false;
        }
        self.processing_status = next;
        if next == ProcessingStatus::Completed {
            self.processed_at = Some(Utc::now());
        }
        true
    }

    /// Move a failed event back to processing for one more attempt.
    /// Returns false when the event is not failed or the retry cap is hit.
    pub fn begin_retry(&mut self) -> bool {
        if self.processing_status != ProcessingStatus::Failed
            || self.retry_count >= MAX_WEBHOOK_RETRIES
        {
            return false;
        }
        self.retry_count += 1;
        self.processing_status = ProcessingStatus::Processing;
        true
    }
}

/// A resolved on-call contact, addressable on one or more channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}
