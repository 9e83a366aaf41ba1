//! escalert: alert lifecycle and escalation engine with multi-channel
//! notification dispatch and delivery correlation.
//!
//! Alerts escalate over time through a per-severity policy table; each
//! escalation fans out to email, whatsapp and push recipients resolved from
//! on-call roles. Whatsapp deliveries are confirmed asynchronously by the
//! provider through webhooks, correlated back onto the outbound records.

pub mod api;
pub mod cli;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod provider;
pub mod store;
pub mod sweep;
pub mod webhook;

pub use config::Config;
pub use error::{ConfigError, DispatchError, LifecycleError, ProviderError, WebhookError};
pub use lifecycle::AlertManager;
pub use model::{Alert, AlertStatus, Channel, DeliveryState, Severity};
