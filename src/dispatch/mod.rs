//! Notification dispatcher: fans one alert out to channels and recipients.
//!
//! Failure isolation is the contract here: one channel failing never stops
//! the others, and one recipient failing never stops the rest of its
//! channel. Every (channel, recipient) pair gets a NotificationAttempt
//! regardless of outcome, so the audit trail is complete even when nothing
//! was actually delivered.

mod email;
mod push;

pub use email::EmailSender;
pub use push::{HttpPushSender, PushSender};

use std::sync::Arc;

use crate::directory::RecipientResolver;
use crate::error::DispatchError;
use crate::format::MessageFormatter;
use crate::model::{Alert, Channel, Contact, DeliveryState, NotificationAttempt};
use crate::provider::ProviderClient;
use crate::store::AttemptStore;

/// Parameters the alert notification template takes: title, severity,
/// description, in that order.
pub const ALERT_TEMPLATE_PARAMETERS: usize = 3;

pub struct Dispatcher {
    resolver: RecipientResolver,
    formatter: MessageFormatter,
    provider: Arc<ProviderClient>,
    email: Option<EmailSender>,
    push: Option<Arc<dyn PushSender>>,
    attempts: Arc<dyn AttemptStore>,
    alert_template: String,
}

impl Dispatcher {
    pub fn new(
        resolver: RecipientResolver,
        provider: Arc<ProviderClient>,
        email: Option<EmailSender>,
        push: Option<Arc<dyn PushSender>>,
        attempts: Arc<dyn AttemptStore>,
        alert_template: String,
    ) -> Self {
        Self {
            resolver,
            formatter: MessageFormatter::new(),
            provider,
            email,
            push,
            attempts,
            alert_template,
        }
    }

    /// Fan `alert` out to every channel in `channels` for the contacts
    /// holding `roles`. Returns one attempt per (channel, recipient).
    pub async fn dispatch(
        &self,
        alert: &Alert,
        roles: &[String],
        channels: &[Channel],
    ) -> Vec<NotificationAttempt> {
        let contacts = self.resolver.resolve(roles).await;
        if contacts.is_empty() {
            tracing::warn!(
                alert_id = %alert.id,
                roles = ?roles,
                "No recipients resolved, skipping dispatch"
            );
            return Vec::new();
        }

        let mut attempts = Vec::new();
        for channel in channels {
            let channel_attempts = match channel {
                Channel::Whatsapp => self.dispatch_whatsapp(alert, &contacts).await,
                Channel::Email => self.dispatch_email(alert, &contacts).await,
                Channel::Push => self.dispatch_push(alert, &contacts).await,
                Channel::Sms => self.dispatch_unsupported(alert, *channel, &contacts),
            };
            for attempt in &channel_attempts {
                let outcome = if attempt.status == DeliveryState::Failed {
                    "failed"
                } else {
                    "sent"
                };
                metrics::counter!(
                    "escalert_notifications_total",
                    "channel" => channel.as_str(),
                    "outcome" => outcome
                )
                .increment(1);
            }
            attempts.extend(channel_attempts);
        }

        tracing::info!(
            alert_id = %alert.id,
            level = alert.escalation_level,
            attempt_count = attempts.len(),
            "Dispatch complete"
        );
        attempts
    }

    /// Whatsapp delegates entirely to the provider client; the attempt
    /// mirrors the OutboundMessage outcome for its recipient.
    async fn dispatch_whatsapp(
        &self,
        alert: &Alert,
        contacts: &[Contact],
    ) -> Vec<NotificationAttempt> {
        let text = self.formatter.text(alert, alert.escalation_level);
        let phones: Vec<String> = contacts.iter().filter_map(|c| c.phone.clone()).collect();
        if phones.is_empty() {
            tracing::info!(alert_id = %alert.id, "No recipients with a phone, whatsapp skipped");
            return Vec::new();
        }

        let mut attempts: Vec<NotificationAttempt> = phones
            .iter()
            .map(|phone| {
                let attempt = NotificationAttempt::new(
                    alert.id,
                    Channel::Whatsapp,
                    phone.clone(),
                    text.clone(),
                );
                self.attempts.insert(attempt.clone());
                attempt
            })
            .collect();

        let parameters = vec![
            alert.title.clone(),
            alert.severity.to_string(),
            alert.description.clone(),
        ];
        let result = self
            .provider
            .send_template(
                &self.alert_template,
                &parameters,
                &phones,
                Some(format!("alert:{}", alert.id)),
            )
            .await;

        match result {
            Ok(messages) => {
                for (attempt, message) in attempts.iter_mut().zip(messages.iter()) {
                    if message.state == DeliveryState::Sent {
                        attempt.mark_sent(message.external_id.clone());
                    } else {
                        attempt.mark_failed(
                            message
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "send failed".to_string()),
                        );
                    }
                    self.attempts.update(attempt);
                }
            }
            Err(e) => {
                // Validation or configuration problem: the whole channel
                // failed before any I/O, but other channels still run.
                tracing::error!(alert_id = %alert.id, error = %e, "Whatsapp dispatch aborted");
                for attempt in attempts.iter_mut() {
                    attempt.mark_failed(e.to_string());
                    self.attempts.update(attempt);
                }
            }
        }
        attempts
    }

    async fn dispatch_email(&self, alert: &Alert, contacts: &[Contact]) -> Vec<NotificationAttempt> {
        let rendered = self.formatter.email(alert, alert.escalation_level);
        let mut attempts = Vec::new();

        for contact in contacts {
            let Some(address) = &contact.email else {
                tracing::debug!(user_id = %contact.user_id, "Contact has no email, skipped");
                continue;
            };
            let mut attempt = NotificationAttempt::new(
                alert.id,
                Channel::Email,
                address.clone(),
                rendered.text.clone(),
            );
            self.attempts.insert(attempt.clone());

            match &self.email {
                Some(sender) => match sender.send(address, &rendered).await {
                    Ok(()) => attempt.mark_sent(None),
                    Err(e) => {
                        tracing::warn!(
                            alert_id = %alert.id,
                            recipient = %address,
                            error = %e,
                            "Email send failed"
                        );
                        attempt.mark_failed(e.to_string());
                    }
                },
                None => {
                    attempt.mark_failed(
                        DispatchError::ChannelUnavailable {
                            channel: Channel::Email,
                            message: "no smtp configuration".to_string(),
                        }
                        .to_string(),
                    );
                }
            }
            self.attempts.update(&attempt);
            attempts.push(attempt);
        }
        attempts
    }

    async fn dispatch_push(&self, alert: &Alert, contacts: &[Contact]) -> Vec<NotificationAttempt> {
        let payload = self.formatter.push(alert, alert.escalation_level);
        let body = payload.to_string();
        let mut attempts = Vec::new();

        for contact in contacts {
            let mut attempt = NotificationAttempt::new(
                alert.id,
                Channel::Push,
                contact.user_id.clone(),
                body.clone(),
            );
            self.attempts.insert(attempt.clone());

            match &self.push {
                Some(sender) => match sender.send(&contact.user_id, &payload).await {
                    Ok(()) => attempt.mark_sent(None),
                    Err(e) => {
                        tracing::warn!(
                            alert_id = %alert.id,
                            user_id = %contact.user_id,
                            error = %e,
                            "Push send failed"
                        );
                        attempt.mark_failed(e.to_string());
                    }
                },
                None => {
                    attempt.mark_failed(
                        DispatchError::ChannelUnavailable {
                            channel: Channel::Push,
                            message: "push capability not configured".to_string(),
                        }
                        .to_string(),
                    );
                }
            }
            self.attempts.update(&attempt);
            attempts.push(attempt);
        }
        attempts
    }

    /// Channels with no implementation fail each attempt up front, no I/O.
    fn dispatch_unsupported(
        &self,
        alert: &Alert,
        channel: Channel,
        contacts: &[Contact],
    ) -> Vec<NotificationAttempt> {
        let error = DispatchError::UnsupportedChannel(channel).to_string();
        contacts
            .iter()
            .map(|contact| {
                let recipient = contact
                    .phone
                    .clone()
                    .unwrap_or_else(|| contact.user_id.clone());
                let mut attempt =
                    NotificationAttempt::new(alert.id, channel, recipient, String::new());
                attempt.mark_failed(error.clone());
                self.attempts.insert(attempt.clone());
                attempt
            })
            .collect()
    }
}
