//! Alert lifecycle manager: the state machine plus its side effects.
//!
//! Invalid transitions are no-ops, logged and audited, never hard errors;
//! a resolve racing an acknowledge should not take anyone's pager down
//! with a 500.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::LifecycleError;
use crate::model::{Alert, AlertStatus, Severity};
use crate::policy::{next_level, PolicyTable};
use crate::store::{AlertStore, AuditEvent, AuditSink};

pub struct AlertManager {
    alerts: Arc<dyn AlertStore>,
    dispatcher: Arc<Dispatcher>,
    policies: PolicyTable,
    audit: Arc<dyn AuditSink>,
}

impl AlertManager {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        dispatcher: Arc<Dispatcher>,
        policies: PolicyTable,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            alerts,
            dispatcher,
            policies,
            audit,
        }
    }

    /// Create a new alert and dispatch its level-0 notifications before
    /// returning. The caller blocks until the first wave is attempted.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_alert(
        &self,
        title: String,
        description: String,
        severity: Severity,
        alert_type: String,
        source_type: String,
        source_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Alert {
        let alert = Alert::new(
            title,
            description,
            severity,
            alert_type,
            source_type,
            source_id,
            metadata,
        );
        self.alerts.insert(alert.clone());
        metrics::counter!("escalert_alerts_created_total", "severity" => severity.as_str())
            .increment(1);
        tracing::info!(
            alert_id = %alert.id,
            severity = %severity,
            title = %alert.title,
            "Alert created"
        );
        self.audit.record(AuditEvent::new(
            "alert_created",
            Some(alert.id),
            format!("severity={}", severity),
        ));

        // Level 0 always fires immediately; its threshold is zero by
        // construction.
        let step = &self.policies.for_severity(severity)[0];
        let (roles, channels) = (step.roles.clone(), step.channels.clone());
        let mut alert = alert;
        alert.notification_count += 1;
        self.alerts.update(&alert);
        self.dispatcher.dispatch(&alert, &roles, &channels).await;

        alert
    }

    /// Acknowledge an alert. Valid only from active or escalated.
    pub fn acknowledge(&self, alert_id: Uuid, actor: &str) -> Result<Alert, LifecycleError> {
        let Some(mut alert) = self.alerts.get(alert_id) else {
            return Err(LifecycleError::AlertNotFound(alert_id));
        };

        if !matches!(alert.status, AlertStatus::Active | AlertStatus::Escalated) {
            self.log_invalid_transition(&alert, "acknowledge");
            return Ok(alert);
        }

        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        self.alerts.update(&alert);
        tracing::info!(alert_id = %alert.id, actor = %actor, "Alert acknowledged");
        self.audit.record(AuditEvent::new(
            "alert_acknowledged",
            Some(alert.id),
            format!("actor={}", actor),
        ));
        Ok(alert)
    }

    /// Resolve an alert. Valid from any non-terminal state.
    pub fn resolve(
        &self,
        alert_id: Uuid,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Alert, LifecycleError> {
        let Some(mut alert) = self.alerts.get(alert_id) else {
            return Err(LifecycleError::AlertNotFound(alert_id));
        };

        if alert.is_terminal() {
            self.log_invalid_transition(&alert, "resolve");
            return Ok(alert);
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        alert.resolution_notes = notes;
        self.alerts.update(&alert);
        metrics::counter!("escalert_alerts_resolved_total").increment(1);
        tracing::info!(alert_id = %alert.id, actor = %actor, "Alert resolved");
        self.audit.record(AuditEvent::new(
            "alert_resolved",
            Some(alert.id),
            format!("actor={}", actor),
        ));
        Ok(alert)
    }

    /// Escalate to `target_level`. No-op when `target_level` does not
    /// exceed the current level or the alert is no longer open.
    pub async fn escalate(
        &self,
        alert_id: Uuid,
        target_level: usize,
        reason: &str,
    ) -> Result<Alert, LifecycleError> {
        let Some(mut alert) = self.alerts.get(alert_id) else {
            return Err(LifecycleError::AlertNotFound(alert_id));
        };

        if !alert.is_open() {
            self.log_invalid_transition(&alert, "escalate");
            return Ok(alert);
        }

        // Clamp before the no-op check so an over-the-top target on an
        // already-top alert does not re-dispatch.
        let steps = self.policies.for_severity(alert.severity);
        let target_level = target_level.min(steps.len() - 1);
        if target_level <= alert.escalation_level {
            tracing::debug!(
                alert_id = %alert.id,
                current = alert.escalation_level,
                target = target_level,
                "Escalation target not above current level, skipping"
            );
            return Ok(alert);
        }

        let step = &steps[target_level];
        let (roles, channels) = (step.roles.clone(), step.channels.clone());

        alert.escalation_level = target_level;
        alert.status = AlertStatus::Escalated;
        alert.notification_count += 1;
        alert.last_escalated_at = Some(Utc::now());
        self.alerts.update(&alert);

        metrics::counter!(
            "escalert_escalations_total",
            "severity" => alert.severity.as_str()
        )
        .increment(1);
        tracing::info!(
            alert_id = %alert.id,
            level = target_level,
            reason = %reason,
            "Alert escalated"
        );
        self.audit.record(AuditEvent::new(
            "alert_escalated",
            Some(alert.id),
            format!("level={} reason={}", target_level, reason),
        ));

        self.dispatcher.dispatch(&alert, &roles, &channels).await;
        Ok(alert)
    }

    /// Operator-driven escalation, bypassing the age gate. Without a target
    /// it bumps one level, clamped to the policy's top step.
    pub async fn manual_escalate(
        &self,
        alert_id: Uuid,
        reason: &str,
        target_level: Option<usize>,
    ) -> Result<Alert, LifecycleError> {
        let Some(alert) = self.alerts.get(alert_id) else {
            return Err(LifecycleError::AlertNotFound(alert_id));
        };
        let max = self.policies.max_level(alert.severity);
        let target = target_level
            .unwrap_or(alert.escalation_level + 1)
            .min(max);
        self.escalate(alert_id, target, reason).await
    }

    /// Evaluate one alert against its policy and escalate when its age has
    /// crossed a new threshold. Returns the new level when escalation fired.
    pub async fn evaluate(&self, alert: &Alert) -> Option<usize> {
        if !alert.is_open() {
            return None;
        }
        let age = alert.age(Utc::now()).to_std().unwrap_or_default();
        let steps = self.policies.for_severity(alert.severity);
        let candidate = next_level(steps, age, alert.escalation_level)?;

        match self.escalate(alert.id, candidate, "age threshold crossed").await {
            Ok(updated) if updated.escalation_level == candidate => Some(candidate),
            Ok(_) => None,
            Err(e) => {
                tracing::error!(alert_id = %alert.id, error = %e, "Sweep escalation failed");
                None
            }
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    fn log_invalid_transition(&self, alert: &Alert, operation: &'static str) {
        let err = LifecycleError::InvalidTransition {
            from: alert.status,
            operation,
        };
        tracing::warn!(alert_id = %alert.id, error = %err, "Ignoring lifecycle operation");
        self.audit.record(AuditEvent::new(
            "invalid_transition",
            Some(alert.id),
            err.to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectoryConfig, PhoneConfig, ProviderConfig, TemplateSpec, UserConfig};
    use crate::directory::{ConfigDirectory, RecipientResolver};
    use crate::model::Channel;
    use crate::policy::EscalationStep;
    use crate::provider::ProviderClient;
    use crate::store::{
        AttemptStore, MemoryAlertStore, MemoryAttemptStore, MemoryAuditLog, MemoryMessageStore,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn make_manager(
        alerts: Arc<MemoryAlertStore>,
        attempts: Arc<MemoryAttemptStore>,
        audit: Arc<MemoryAuditLog>,
    ) -> AlertManager {
        let directory = ConfigDirectory::from_config(&DirectoryConfig {
            default_role: "admin".to_string(),
            users: vec![UserConfig {
                id: "ana".to_string(),
                email: Some("ana@example.com".to_string()),
                phone: Some("34600111222".to_string()),
                roles: vec!["operator".to_string(), "admin".to_string()],
            }],
        });
        let resolver = RecipientResolver::new(Arc::new(directory), "admin".to_string());

        let provider = Arc::new(
            ProviderClient::from_config(
                &ProviderConfig {
                    base_url: "https://provider.invalid".to_string(),
                    timeout: Duration::from_secs(1),
                    pacing: Duration::from_millis(0),
                    failover_threshold: 2,
                    language: "es".to_string(),
                    primary: PhoneConfig {
                        phone_number_id: "111".to_string(),
                        token: "tok".to_string(),
                    },
                    backup: PhoneConfig {
                        phone_number_id: "222".to_string(),
                        token: "tok".to_string(),
                    },
                    alert_template: "alerta".to_string(),
                    templates: HashMap::from([(
                        "alerta".to_string(),
                        TemplateSpec {
                            parameter_count: 3,
                            active: true,
                        },
                    )]),
                    groups: HashMap::new(),
                    concessions: HashMap::new(),
                },
                reqwest::Client::new(),
                Arc::new(MemoryMessageStore::new()),
            )
            .unwrap(),
        );
        // Sms only: no network I/O in these tests.
        let dispatcher = Arc::new(Dispatcher::new(
            resolver,
            provider,
            None,
            None,
            attempts,
            "alerta".to_string(),
        ));

        let steps = vec![
            EscalationStep {
                threshold: minutes(0),
                roles: vec!["operator".to_string()],
                channels: vec![Channel::Sms],
            },
            EscalationStep {
                threshold: minutes(15),
                roles: vec!["operator".to_string()],
                channels: vec![Channel::Sms],
            },
            EscalationStep {
                threshold: minutes(30),
                roles: vec!["admin".to_string()],
                channels: vec![Channel::Sms],
            },
        ];
        let policies =
            PolicyTable::new(HashMap::from([(Severity::Critical, steps)])).unwrap();

        AlertManager::new(alerts, dispatcher, policies, audit)
    }

    async fn create(manager: &AlertManager) -> Alert {
        manager
            .create_alert(
                "Pump offline".to_string(),
                "No heartbeat".to_string(),
                Severity::Critical,
                "heartbeat".to_string(),
                "pump".to_string(),
                None,
                json!({}),
            )
            .await
    }

    #[tokio::test]
    async fn create_dispatches_level_zero() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let attempts = Arc::new(MemoryAttemptStore::new());
        let manager = make_manager(alerts.clone(), attempts.clone(), Arc::new(MemoryAuditLog::new()));

        let alert = create(&manager).await;

        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.escalation_level, 0);
        assert_eq!(alert.notification_count, 1);
        // One attempt per (channel, recipient) from the level-0 step.
        assert_eq!(attempts.for_alert(alert.id).len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_then_resolve() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let manager = make_manager(
            alerts.clone(),
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        let alert = create(&manager).await;

        let acked = manager.acknowledge(alert.id, "ana").unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());

        let resolved = manager
            .resolve(alert.id, "ana", Some("restarted pump".to_string()))
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolution_notes.as_deref(), Some("restarted pump"));
    }

    #[tokio::test]
    async fn operations_on_terminal_alert_are_logged_noops() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let attempts = Arc::new(MemoryAttemptStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let manager = make_manager(alerts.clone(), attempts.clone(), audit.clone());
        let alert = create(&manager).await;
        manager.resolve(alert.id, "ana", None).unwrap();
        let attempts_before = attempts.all().len();

        let after_ack = manager.acknowledge(alert.id, "ana").unwrap();
        assert_eq!(after_ack.status, AlertStatus::Resolved);
        assert!(after_ack.acknowledged_at.is_none());

        let after_escalate = manager.escalate(alert.id, 2, "test").await.unwrap();
        assert_eq!(after_escalate.status, AlertStatus::Resolved);
        assert_eq!(after_escalate.escalation_level, 0);
        assert_eq!(attempts.all().len(), attempts_before);

        assert!(audit
            .all()
            .iter()
            .any(|e| e.kind == "invalid_transition"));
    }

    #[tokio::test]
    async fn escalate_is_monotonic() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let manager = make_manager(
            alerts.clone(),
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        let alert = create(&manager).await;

        let escalated = manager.escalate(alert.id, 2, "test").await.unwrap();
        assert_eq!(escalated.escalation_level, 2);
        assert_eq!(escalated.status, AlertStatus::Escalated);
        assert_eq!(escalated.notification_count, 2);

        // Lower or equal targets are no-ops.
        let unchanged = manager.escalate(alert.id, 1, "test").await.unwrap();
        assert_eq!(unchanged.escalation_level, 2);
        assert_eq!(unchanged.notification_count, 2);
    }

    #[tokio::test]
    async fn escalate_past_top_step_on_top_alert_is_noop() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let attempts = Arc::new(MemoryAttemptStore::new());
        let manager = make_manager(
            alerts.clone(),
            attempts.clone(),
            Arc::new(MemoryAuditLog::new()),
        );
        let alert = create(&manager).await;

        let top = manager.escalate(alert.id, 99, "test").await.unwrap();
        assert_eq!(top.escalation_level, 2);
        assert_eq!(top.notification_count, 2);
        let attempts_at_top = attempts.all().len();

        // Already at the top step: another oversized target must neither
        // bump the counter nor fire notifications again.
        let unchanged = manager.escalate(alert.id, 99, "test").await.unwrap();
        assert_eq!(unchanged.escalation_level, 2);
        assert_eq!(unchanged.notification_count, 2);
        assert_eq!(attempts.all().len(), attempts_at_top);
    }

    #[tokio::test]
    async fn unknown_alert_is_an_error() {
        let manager = make_manager(
            Arc::new(MemoryAlertStore::new()),
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        let missing = Uuid::new_v4();
        assert!(matches!(
            manager.acknowledge(missing, "ana"),
            Err(LifecycleError::AlertNotFound(_))
        ));
    }

    #[tokio::test]
    async fn evaluate_escalates_aged_alert() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let manager = make_manager(
            alerts.clone(),
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        let alert = create(&manager).await;

        // Backdate creation by 20 minutes: crosses the 15m threshold only.
        let mut aged = alerts.get(alert.id).unwrap();
        aged.created_at = Utc::now() - chrono::Duration::minutes(20);
        alerts.update(&aged);

        assert_eq!(manager.evaluate(&aged).await, Some(1));
        let stored = alerts.get(alert.id).unwrap();
        assert_eq!(stored.escalation_level, 1);

        // Same age again: idempotent, no new candidate.
        let stored = alerts.get(alert.id).unwrap();
        assert_eq!(manager.evaluate(&stored).await, None);
    }

    #[tokio::test]
    async fn evaluate_skips_acknowledged_alerts() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let manager = make_manager(
            alerts.clone(),
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        let alert = create(&manager).await;
        manager.acknowledge(alert.id, "ana").unwrap();

        let mut aged = alerts.get(alert.id).unwrap();
        aged.created_at = Utc::now() - chrono::Duration::minutes(600);
        alerts.update(&aged);

        assert_eq!(manager.evaluate(&aged).await, None);
    }

    #[tokio::test]
    async fn manual_escalate_defaults_to_next_level_clamped() {
        let alerts = Arc::new(MemoryAlertStore::new());
        let manager = make_manager(
            alerts.clone(),
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        let alert = create(&manager).await;

        let bumped = manager.manual_escalate(alert.id, "operator call", None).await.unwrap();
        assert_eq!(bumped.escalation_level, 1);

        let top = manager
            .manual_escalate(alert.id, "operator call", Some(99))
            .await
            .unwrap();
        assert_eq!(top.escalation_level, 2);
    }
}
