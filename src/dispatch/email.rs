//! Email channel backed by an async SMTP transport.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{resolve_env_vars, EmailConfig};
use crate::error::{ConfigError, DispatchError};
use crate::format::RenderedEmail;
use crate::model::Channel;

pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    /// Build the SMTP transport from configuration, resolving `${ENV}`
    /// credentials.
    pub fn from_config(config: &EmailConfig) -> Result<Self, ConfigError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("email.from: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
            &config.smtp.host,
        )
        .port(config.smtp.port);
        if config.smtp.starttls {
            let tls = TlsParameters::new(config.smtp.host.clone())
                .map_err(|e| ConfigError::ValidationError(format!("email.smtp tls: {}", e)))?;
            builder = builder.tls(Tls::Required(tls));
        }

        if let (Some(username), Some(password)) = (&config.smtp.username, &config.smtp.password) {
            let username = resolve_env_vars(username)?;
            let password = resolve_env_vars(password)?;
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Send one rendered alert email. Errors stay per-recipient; the caller
    /// records them on the attempt.
    pub async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), DispatchError> {
        let to: Mailbox = to.parse().map_err(|e| DispatchError::SendFailed(format!(
            "invalid recipient address '{}': {}",
            to, e
        )))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| DispatchError::SendFailed(format!("failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DispatchError::ChannelUnavailable {
                channel: Channel::Email,
                message: e.to_string(),
            })?;
        Ok(())
    }
}
