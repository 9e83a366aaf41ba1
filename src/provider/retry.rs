//! Periodic re-delivery of failed provider messages.
//!
//! The coordinator owns the retry policy end to end: it selects failed
//! messages still under the retry cap, increments their retry count through
//! `ProviderClient::resend`, and through that count drives credential
//! failover. Nothing else in the system retries provider sends.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::provider::ProviderClient;
use crate::store::MessageStore;

pub struct RetryCoordinator {
    provider: Arc<ProviderClient>,
    messages: Arc<dyn MessageStore>,
    interval: Duration,
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(
        provider: Arc<ProviderClient>,
        messages: Arc<dyn MessageStore>,
        interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            messages,
            interval,
            max_retries,
        }
    }

    /// Run retry passes until shutdown. Single consumer of failed messages;
    /// running two coordinators against one store would double-send.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Retry coordinator shutting down");
                    return;
                }
            }
        }
    }

    /// One retry pass over the currently eligible failed messages.
    pub async fn run_once(&self) -> usize {
        let eligible = self.messages.failed_below_retry_count(self.max_retries);
        if eligible.is_empty() {
            return 0;
        }

        tracing::info!(count = eligible.len(), "Retrying failed provider messages");
        let mut retried = 0;
        for message in eligible {
            let id = message.id;
            let recipient = message.recipient.clone();
            let result = self.provider.resend(message).await;
            retried += 1;
            metrics::counter!("escalert_message_retries_total").increment(1);
            tracing::debug!(
                message_id = %id,
                recipient = %recipient,
                state = %result.state,
                retry_count = result.retry_count,
                "Retry attempt finished"
            );
        }
        retried
    }
}
