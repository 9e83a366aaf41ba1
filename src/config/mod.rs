//! Configuration loading, validation and secret handling.

mod env;
mod secret;
mod types;


pub use env::resolve_env_vars;
pub use secret::SecretString;
pub use types::{
    Config, DirectoryConfig, EmailConfig, GroupConfig, GroupMember, MetricsConfig, PhoneConfig,
    ProviderConfig, PushConfig, RetryConfig, SmtpConfig, StepConfig, SweepConfig, TemplateSpec,
    UserConfig, WebhookConfig, DEFAULT_CONFIG_PATH,
};
