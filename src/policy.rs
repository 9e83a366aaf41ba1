//! Escalation policies and the pure level evaluator.
//!
//! A policy is an ordered list of steps per severity, each step naming the
//! age threshold at which it fires and the roles/channels to notify. The
//! evaluator is a pure function over (policy, age, current level) so the
//! sweep stays trivially testable and idempotent.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::{Channel, Severity};

/// One step of an escalation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationStep {
    /// Alert age at which this step fires, measured from `created_at`.
    pub threshold: Duration,
    /// Roles to resolve into recipients for this step.
    pub roles: Vec<String>,
    /// Channels to notify for this step.
    pub channels: Vec<Channel>,
}

/// Static per-severity escalation policy table, loaded at startup and
/// injected into the lifecycle manager.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<Severity, Vec<EscalationStep>>,
}

impl PolicyTable {
    pub fn new(policies: HashMap<Severity, Vec<EscalationStep>>) -> Result<Self, ConfigError> {
        for (severity, steps) in &policies {
            validate_steps(*severity, steps)?;
        }
        if policies.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one escalation policy is required".to_string(),
            ));
        }
        Ok(Self { policies })
    }

    /// Policy steps for a severity.
    ///
    /// Severities without a specific policy fall back to the policy of the
    /// lowest severity that has one.
    pub fn for_severity(&self, severity: Severity) -> &[EscalationStep] {
        if let Some(steps) = self.policies.get(&severity) {
            return steps;
        }
        // Fallback: walk severities from least to most urgent.
        for fallback in Severity::ALL.iter().rev() {
            if let Some(steps) = self.policies.get(fallback) {
                tracing::debug!(
                    severity = %severity,
                    fallback = %fallback,
                    "No policy for severity, using fallback"
                );
                return steps;
            }
        }
        unreachable!("PolicyTable::new rejects empty tables");
    }

    /// Highest configured step index for a severity.
    pub fn max_level(&self, severity: Severity) -> usize {
        self.for_severity(severity).len().saturating_sub(1)
    }
}

fn validate_steps(severity: Severity, steps: &[EscalationStep]) -> Result<(), ConfigError> {
    if steps.is_empty() {
        return Err(ConfigError::InvalidPolicy {
            severity: severity.to_string(),
            message: "policy must contain at least one step".to_string(),
        });
    }
    if steps[0].threshold != Duration::ZERO {
        return Err(ConfigError::InvalidPolicy {
            severity: severity.to_string(),
            message: "first step threshold must be 0".to_string(),
        });
    }
    for pair in steps.windows(2) {
        if pair[1].threshold <= pair[0].threshold {
            return Err(ConfigError::InvalidPolicy {
                severity: severity.to_string(),
                message: "thresholds must be strictly increasing".to_string(),
            });
        }
    }
    for (i, step) in steps.iter().enumerate() {
        if step.roles.is_empty() {
            return Err(ConfigError::InvalidPolicy {
                severity: severity.to_string(),
                message: format!("step {} has no roles", i),
            });
        }
        if step.channels.is_empty() {
            return Err(ConfigError::InvalidPolicy {
                severity: severity.to_string(),
                message: format!("step {} has no channels", i),
            });
        }
    }
    Ok(())
}

/// Compute the next escalation level for an alert, if any.
///
/// Returns the highest step index whose threshold the alert's age has
/// crossed and which is strictly greater than `current_level`. Re-invoking
/// with an unchanged age yields `None`, which makes the sweep idempotent.
pub fn next_level(
    steps: &[EscalationStep],
    age: Duration,
    current_level: usize,
) -> Option<usize> {
    steps
        .iter()
        .enumerate()
        .filter(|(i, step)| step.threshold <= age && *i > current_level)
        .map(|(i, _)| i)
        .next_back()
}
