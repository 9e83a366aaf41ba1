//! Optional push capability.
//!
//! Push delivery may not be deployed at all; the dispatcher holds an
//! `Option<Arc<dyn PushSender>>` and records a configuration failure on the
//! attempt when the capability is absent.

use async_trait::async_trait;

use crate::config::{resolve_env_vars, PushConfig, SecretString};
use crate::error::{ConfigError, DispatchError};

#[async_trait]
pub trait PushSender: Send + Sync {
    /// Deliver one structured payload to one user.
    async fn send(&self, user_id: &str, payload: &serde_json::Value)
        -> Result<(), DispatchError>;
}

/// Push sender POSTing to a relay service with bearer auth.
pub struct HttpPushSender {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
}

impl HttpPushSender {
    pub fn from_config(config: &PushConfig, client: reqwest::Client) -> Result<Self, ConfigError> {
        let token = resolve_env_vars(&config.token)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: SecretString::new(token),
        })
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let body = serde_json::json!({
            "user_id": user_id,
            "notification": payload,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::SendFailed(format!("push transport error: {}", e)))?;

        if !response.status().is_success() {
            return Err(DispatchError::SendFailed(format!(
                "push relay returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
