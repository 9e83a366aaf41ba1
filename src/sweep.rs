//! Periodic escalation sweep.
//!
//! A single task owns all escalation writes. Alerts are evaluated one at a
//! time within a pass, so two sweeps can never escalate the same alert
//! concurrently; there is deliberately no per-alert locking anywhere else.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::AlertManager;
use crate::store::AlertStore;

pub struct SweepScheduler {
    manager: Arc<AlertManager>,
    alerts: Arc<dyn AlertStore>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(manager: Arc<AlertManager>, alerts: Arc<dyn AlertStore>, interval: Duration) -> Self {
        Self {
            manager,
            alerts,
            interval,
        }
    }

    /// Run sweep passes until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Escalation sweep shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over every open alert. Returns the number of alerts that
    /// escalated. Re-running immediately is a no-op for unchanged ages.
    pub async fn run_once(&self) -> usize {
        let open = self.alerts.open_alerts();
        if open.is_empty() {
            return 0;
        }

        tracing::debug!(open_count = open.len(), "Escalation sweep pass");
        let mut escalated = 0;
        for alert in open {
            if self.manager.evaluate(&alert).await.is_some() {
                escalated += 1;
            }
        }

        metrics::counter!("escalert_sweep_passes_total").increment(1);
        if escalated > 0 {
            tracing::info!(escalated, "Sweep escalated alerts");
        }
        escalated
    }
}
