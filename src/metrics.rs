//! Prometheus metrics exposition.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP exposition listener.
pub fn init(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    register_metric_descriptions();
    tracing::info!(port, "Metrics exposition listening");
    Ok(())
}

fn register_metric_descriptions() {
    metrics::describe_counter!(
        "escalert_alerts_created_total",
        "Alerts created, by severity"
    );
    metrics::describe_counter!("escalert_alerts_resolved_total", "Alerts resolved");
    metrics::describe_counter!(
        "escalert_escalations_total",
        "Escalations fired, by severity"
    );
    metrics::describe_counter!(
        "escalert_notifications_total",
        "Notification attempts, by channel and outcome"
    );
    metrics::describe_counter!(
        "escalert_provider_sends_total",
        "Provider template sends, by outcome"
    );
    metrics::describe_counter!(
        "escalert_message_retries_total",
        "Failed provider messages re-attempted by the retry coordinator"
    );
    metrics::describe_counter!(
        "escalert_webhook_events_total",
        "Inbound webhook deliveries persisted"
    );
    metrics::describe_counter!(
        "escalert_webhook_malformed_total",
        "Inbound webhook deliveries with unparseable payloads"
    );
    metrics::describe_counter!(
        "escalert_deliveries_correlated_total",
        "Delivery-state advances applied from webhook callbacks, by status"
    );
    metrics::describe_counter!("escalert_sweep_passes_total", "Escalation sweep passes");
}
