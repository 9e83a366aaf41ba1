//! Delivery provider client for the templated chat-message channel.
//!
//! One call is one attempt: the client never retries internally. Failover
//! to the backup phone/credential pair happens only through the retry
//! count carried on the message, which the retry coordinator increments
//! when it requeues failed sends.

mod retry;
mod wire;

pub use retry::RetryCoordinator;
pub use wire::{SendResponse, TemplateMessageRequest};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GroupConfig, ProviderConfig, SecretString, TemplateSpec};
use crate::config::resolve_env_vars;
use crate::error::ProviderError;
use crate::model::OutboundMessage;
use crate::store::MessageStore;

/// One phone-number/credential pair, tokens resolved.
#[derive(Clone)]
pub struct PhoneCredentials {
    pub phone_number_id: String,
    pub token: SecretString,
}

impl std::fmt::Debug for PhoneCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoneCredentials")
            .field("phone_number_id", &self.phone_number_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// HTTP client against the remote messaging provider.
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
    timeout: Duration,
    pacing: Duration,
    failover_threshold: u32,
    primary: PhoneCredentials,
    backup: PhoneCredentials,
    templates: HashMap<String, TemplateSpec>,
    groups: HashMap<String, GroupConfig>,
    messages: Arc<dyn MessageStore>,
}

impl ProviderClient {
    /// Build the client from configuration, resolving `${ENV}` tokens.
    pub fn from_config(
        config: &ProviderConfig,
        client: reqwest::Client,
        messages: Arc<dyn MessageStore>,
    ) -> Result<Self, ProviderError> {
        let primary = resolve_phone(&config.primary.phone_number_id, &config.primary.token)?;
        let backup = resolve_phone(&config.backup.phone_number_id, &config.backup.token)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            timeout: config.timeout,
            pacing: config.pacing,
            failover_threshold: config.failover_threshold,
            primary,
            backup,
            templates: config.templates.clone(),
            groups: config.groups.clone(),
            messages,
        })
    }

    /// Credentials for a message: backup at or past the failover threshold.
    pub fn select_credentials(&self, retry_count: u32) -> &PhoneCredentials {
        if retry_count >= self.failover_threshold {
            &self.backup
        } else {
            &self.primary
        }
    }

    /// Send one templated message to each recipient, sequentially.
    ///
    /// Validation failures abort before any network I/O; per-recipient
    /// failures are recorded on the corresponding message and never stop
    /// the rest of the batch. The fixed pacing delay between sends is a
    /// rate limit owed to the provider, not incidental latency.
    pub async fn send_template(
        &self,
        template_id: &str,
        parameters: &[String],
        recipients: &[String],
        context: Option<String>,
    ) -> Result<Vec<OutboundMessage>, ProviderError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: "template",
                id: template_id.to_string(),
            })?;
        if !template.active {
            return Err(ProviderError::Validation(format!(
                "template '{}' is not active",
                template_id
            )));
        }
        if parameters.len() != template.parameter_count {
            return Err(ProviderError::Validation(format!(
                "template '{}' expects {} parameters, got {}",
                template_id,
                template.parameter_count,
                parameters.len()
            )));
        }

        let mut sent = Vec::with_capacity(recipients.len());
        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }

            let mut message = OutboundMessage::new(
                recipient.clone(),
                template_id.to_string(),
                parameters.to_vec(),
                context.clone(),
            );
            self.messages.insert(message.clone());

            self.attempt_send(&mut message).await;
            self.messages.update(&message);
            sent.push(message);
        }

        Ok(sent)
    }

    /// Send to a named recipient group from configuration.
    pub async fn send_to_group(
        &self,
        template_id: &str,
        parameters: &[String],
        group_name: &str,
        context: Option<String>,
    ) -> Result<Vec<OutboundMessage>, ProviderError> {
        let group = self
            .groups
            .get(group_name)
            .ok_or_else(|| ProviderError::NotFound {
                kind: "recipient group",
                id: group_name.to_string(),
            })?;
        if !group.active {
            return Err(ProviderError::Validation(format!(
                "recipient group '{}' is not active",
                group_name
            )));
        }

        let recipients: Vec<String> = group
            .members
            .iter()
            .filter(|m| m.active)
            .map(|m| m.phone.clone())
            .collect();

        self.send_template(template_id, parameters, &recipients, context)
            .await
    }

    /// Re-attempt one previously failed message with an incremented retry
    /// count, which is what moves a message onto the backup credentials.
    pub async fn resend(&self, mut message: OutboundMessage) -> OutboundMessage {
        message.retry_count += 1;
        message.state = crate::model::DeliveryState::Pending;
        message.error_message = None;
        self.messages.update(&message);

        self.attempt_send(&mut message).await;
        self.messages.update(&message);
        message
    }

    /// Perform exactly one provider call for `message` and record the
    /// outcome on it. Transport errors and provider rejections both end in
    /// state `failed`; there is no in-call retry.
    async fn attempt_send(&self, message: &mut OutboundMessage) {
        let credentials = self.select_credentials(message.retry_count).clone();
        let url = format!(
            "{}/{}/messages",
            self.base_url, credentials.phone_number_id
        );
        let body = wire::TemplateMessageRequest::new(
            &message.recipient,
            &message.template_id,
            &self.language,
            &message.parameters,
        );

        tracing::debug!(
            recipient = %message.recipient,
            template = %message.template_id,
            phone_number_id = %credentials.phone_number_id,
            retry_count = message.retry_count,
            "Sending template message"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(credentials.token.expose())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status().as_u16();
                match resp.json::<wire::SendResponse>().await {
                    Ok(parsed) => match parsed.first_message_id() {
                        Some(external_id) => {
                            message.mark_sent(
                                external_id.to_string(),
                                credentials.phone_number_id.clone(),
                            );
                            metrics::counter!(
                                "escalert_provider_sends_total",
                                "outcome" => "sent"
                            )
                            .increment(1);
                            tracing::info!(
                                recipient = %message.recipient,
                                external_id = %message.external_id.as_deref().unwrap_or(""),
                                "Template message accepted by provider"
                            );
                        }
                        None => {
                            self.record_failure(
                                message,
                                ProviderError::Provider {
                                    status,
                                    message: "accepted send but returned no message id"
                                        .to_string(),
                                },
                            );
                        }
                    },
                    Err(e) => {
                        self.record_failure(
                            message,
                            ProviderError::Provider {
                                status,
                                message: format!("malformed provider response: {}", e),
                            },
                        );
                    }
                }
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let detail = match resp.json::<wire::ErrorResponse>().await {
                    Ok(err) => err.describe(),
                    Err(_) => "no error body".to_string(),
                };
                self.record_failure(
                    message,
                    ProviderError::Provider {
                        status,
                        message: detail,
                    },
                );
            }
            Err(e) => {
                // Timeouts and connection failures are treated identically
                // to provider rejections: the message fails, nothing retries
                // within this call.
                self.record_failure(message, ProviderError::Transport(e.to_string()));
            }
        }
    }

    fn record_failure(&self, message: &mut OutboundMessage, error: ProviderError) {
        tracing::warn!(
            recipient = %message.recipient,
            template = %message.template_id,
            retry_count = message.retry_count,
            error = %error,
            "Template message send failed"
        );
        metrics::counter!("escalert_provider_sends_total", "outcome" => "failed").increment(1);
        message.mark_failed(error.to_string());
    }
}

fn resolve_phone(phone_number_id: &str, token: &str) -> Result<PhoneCredentials, ProviderError> {
    if phone_number_id.is_empty() {
        return Err(ProviderError::Configuration(
            "phone_number_id must not be empty".to_string(),
        ));
    }
    let token =
        resolve_env_vars(token).map_err(|e| ProviderError::Configuration(e.to_string()))?;
    if token.is_empty() {
        return Err(ProviderError::Configuration(format!(
            "token for phone {} is empty",
            phone_number_id
        )));
    }
    Ok(PhoneCredentials {
        phone_number_id: phone_number_id.to_string(),
        token: SecretString::new(token),
    })
}
