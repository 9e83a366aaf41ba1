//! Configuration types and loading.
//!
//! Configuration is YAML, loaded once at startup and validated fail-fast:
//! `validate()` collects every problem it can find instead of stopping at
//! the first, so operators fix a config in one round trip.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::env::resolve_env_vars;
use crate::error::ConfigError;
use crate::model::{Channel, Severity};
use crate::policy::{EscalationStep, PolicyTable};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/escalert/config.yaml";

fn default_true() -> bool {
    true
}

/// Main configuration structure for escalert.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Remote messaging provider settings.
    pub provider: ProviderConfig,
    /// SMTP settings for the email channel.
    pub email: Option<EmailConfig>,
    /// Optional push capability; absent means push dispatches fail with a
    /// configuration error instead of attempting I/O.
    #[serde(default)]
    pub push: Option<PushConfig>,
    /// User directory backing recipient resolution.
    pub directory: DirectoryConfig,
    /// Per-severity escalation policies.
    pub policies: HashMap<Severity, Vec<StepConfig>>,
    /// Escalation sweep cadence.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Failed-message retry coordinator settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Inbound webhook endpoint settings.
    pub webhook: WebhookConfig,
    /// Metrics exposition configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Remote messaging provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider messages API.
    pub base_url: String,
    /// Request timeout for one send.
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Mandatory pause between sequential sends within one batch.
    #[serde(default = "default_pacing", with = "humantime_serde")]
    pub pacing: Duration,
    /// Retry count at which sends switch to the backup credentials.
    pub failover_threshold: u32,
    /// Template language code sent with every message.
    #[serde(default = "default_language")]
    pub language: String,
    /// Primary phone/credential pair.
    pub primary: PhoneConfig,
    /// Backup phone/credential pair used at or past the failover threshold.
    pub backup: PhoneConfig,
    /// Registered message templates, keyed by template id.
    pub templates: HashMap<String, TemplateSpec>,
    /// Template used for alert notifications on the whatsapp channel.
    /// Must be declared in `templates` with exactly 3 parameters
    /// (title, severity, description).
    pub alert_template: String,
    /// Named recipient groups for direct template sends.
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
    /// Provider phone-number-id to concession code mapping.
    #[serde(default)]
    pub concessions: HashMap<String, String>,
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pacing() -> Duration {
    Duration::from_secs(1)
}

fn default_language() -> String {
    "es".to_string()
}

/// One phone-number/credential pair at the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PhoneConfig {
    pub phone_number_id: String,
    /// Bearer token; supports `${ENV_VAR}` syntax.
    pub token: String,
}

/// A registered provider message template.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    /// Exact number of body parameters the template expects.
    pub parameter_count: usize,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A named recipient group for direct template sends.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    #[serde(default = "default_true")]
    pub active: bool,
    pub members: Vec<GroupMember>,
}

/// One member of a recipient group.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMember {
    /// E.164 phone number without the plus sign.
    pub phone: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// SMTP configuration for the email channel.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp: SmtpConfig,
    /// Sender address.
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Supports `${ENV_VAR}` syntax.
    #[serde(default)]
    pub username: Option<String>,
    /// Supports `${ENV_VAR}` syntax.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

/// Push capability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    /// Bearer token; supports `${ENV_VAR}` syntax.
    pub token: String,
}

/// User directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Role used when another role resolves to zero accounts.
    #[serde(default = "default_admin_role")]
    pub default_role: String,
    pub users: Vec<UserConfig>,
}

fn default_admin_role() -> String {
    "admin".to_string()
}

/// One directory user with contact addresses and held roles.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub roles: Vec<String>,
}

/// One configured escalation step.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Alert age at which this step fires.
    #[serde(with = "humantime_serde")]
    pub after: Duration,
    pub roles: Vec<String>,
    pub channels: Vec<Channel>,
}

/// Escalation sweep cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub interval: Duration,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(120)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
        }
    }
}

/// Failed-message retry coordinator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: default_retry_interval(),
            max_retries: default_max_retries(),
        }
    }
}

/// Inbound webhook endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    /// Verification secret checked on GET subscribe requests.
    /// Supports `${ENV_VAR}` syntax.
    pub verify_token: String,
}

fn default_webhook_port() -> u16 {
    8080
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadError`] if the file cannot be read and
    /// [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate the whole configuration, collecting all errors found.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        // Policies must compile into a valid table.
        if let Err(e) = self.policy_table() {
            errors.push(e);
        }

        // Policy roles must be resolvable, at least via the default role.
        let known_roles: std::collections::HashSet<&str> = self
            .directory
            .users
            .iter()
            .flat_map(|u| u.roles.iter().map(String::as_str))
            .collect();
        if !known_roles.contains(self.directory.default_role.as_str()) {
            errors.push(ConfigError::ValidationError(format!(
                "directory.default_role '{}' is held by no user",
                self.directory.default_role
            )));
        }

        // Provider sanity.
        if self.provider.base_url.is_empty() {
            errors.push(ConfigError::ValidationError(
                "provider.base_url must not be empty".to_string(),
            ));
        }
        for phone in [&self.provider.primary, &self.provider.backup] {
            if phone.phone_number_id.is_empty() || phone.token.is_empty() {
                errors.push(ConfigError::ValidationError(
                    "provider phone configs require phone_number_id and token".to_string(),
                ));
            }
        }
        if self.provider.templates.is_empty() {
            errors.push(ConfigError::ValidationError(
                "provider.templates must declare at least one template".to_string(),
            ));
        }
        match self.provider.templates.get(&self.provider.alert_template) {
            None => {
                errors.push(ConfigError::ValidationError(format!(
                    "provider.alert_template '{}' is not declared in provider.templates",
                    self.provider.alert_template
                )));
            }
            Some(spec) if spec.parameter_count != crate::dispatch::ALERT_TEMPLATE_PARAMETERS => {
                errors.push(ConfigError::ValidationError(format!(
                    "provider.alert_template '{}' must declare exactly {} parameters",
                    self.provider.alert_template,
                    crate::dispatch::ALERT_TEMPLATE_PARAMETERS
                )));
            }
            Some(_) => {}
        }
        for (name, group) in &self.provider.groups {
            if group.members.is_empty() {
                errors.push(ConfigError::ValidationError(format!(
                    "provider.groups.{} has no members",
                    name
                )));
            }
        }

        // Secrets must resolve.
        for (label, value) in [
            ("provider.primary.token", &self.provider.primary.token),
            ("provider.backup.token", &self.provider.backup.token),
            ("webhook.verify_token", &self.webhook.verify_token),
        ] {
            if let Err(e) = resolve_env_vars(value) {
                errors.push(ConfigError::ValidationError(format!("{}: {}", label, e)));
            }
        }

        // Each directory user must be reachable somehow.
        for user in &self.directory.users {
            if user.email.is_none() && user.phone.is_none() {
                errors.push(ConfigError::ValidationError(format!(
                    "directory user '{}' has neither email nor phone",
                    user.id
                )));
            }
            if user.roles.is_empty() {
                errors.push(ConfigError::ValidationError(format!(
                    "directory user '{}' holds no roles",
                    user.id
                )));
            }
        }

        if let Some(email) = &self.email {
            if email.from.parse::<lettre::message::Mailbox>().is_err() {
                errors.push(ConfigError::ValidationError(format!(
                    "email.from '{}' is not a valid address",
                    email.from
                )));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Build the runtime policy table from the configured steps.
    pub fn policy_table(&self) -> Result<PolicyTable, ConfigError> {
        let mut policies = HashMap::new();
        for (severity, steps) in &self.policies {
            let steps = steps
                .iter()
                .map(|s| EscalationStep {
                    threshold: s.after,
                    roles: s.roles.clone(),
                    channels: s.channels.clone(),
                })
                .collect();
            policies.insert(*severity, steps);
        }
        PolicyTable::new(policies)
    }
}
