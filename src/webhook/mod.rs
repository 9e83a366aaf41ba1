//! Inbound webhook endpoint and delivery-status correlation.

mod payload;
mod processor;
mod server;

pub use payload::{EventKind, WebhookPayload};
pub use processor::CorrelationProcessor;
pub use server::{router, serve, WebhookState};
