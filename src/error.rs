//! Centralized error types for escalert using thiserror.
//!
//! Each subsystem gets its own error enum. Per-recipient and per-channel
//! failures are captured in the corresponding attempt/message records and
//! never surface as errors to callers; only validation and configuration
//! problems abort an operation.

use thiserror::Error;

use crate::model::{AlertStatus, Channel};

/// Errors related to configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("invalid escalation policy for severity '{severity}': {message}")]
    InvalidPolicy { severity: String, message: String },
    #[error("undefined environment variable: {0}")]
    UndefinedEnvVar(String),
}

/// Errors raised by the delivery provider client.
///
/// `Validation` and `Configuration` abort a batch before any network I/O.
/// `Provider` and `Transport` are per-recipient outcomes recorded into the
/// OutboundMessage; they only appear as `Err` when a single resend fails.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider configuration error: {0}")]
    Configuration(String),
}

/// Errors raised by notification channels during dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("channel '{0}' has no implementation")]
    UnsupportedChannel(Channel),
    #[error("channel '{channel}' is not configured: {message}")]
    ChannelUnavailable { channel: Channel, message: String },
    #[error("failed to send notification: {0}")]
    SendFailed(String),
}

/// Errors raised by alert lifecycle operations.
///
/// `InvalidTransition` is recorded to the audit trail and logged; lifecycle
/// operations treat it as a no-op rather than propagating it to callers.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("alert {0} not found")]
    AlertNotFound(uuid::Uuid),
    #[error("invalid transition from '{from}' via '{operation}'")]
    InvalidTransition {
        from: AlertStatus,
        operation: &'static str,
    },
}

/// Errors related to inbound webhook processing.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("webhook verification failed")]
    VerificationFailed,
}
