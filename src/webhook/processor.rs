//! Delivery-correlation processor for inbound provider callbacks.
//!
//! Persist-first: every callback becomes a WebhookEvent before any parsing
//! or correlation happens, so the audit trail survives malformed payloads
//! and unknown message ids. Correlation is idempotent; duplicate deliveries
//! of the same status are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::WebhookError;
use crate::model::{DeliveryState, ProcessingStatus, WebhookEvent};
use crate::store::{AttemptStore, AuditSink, AuditEvent, MessageStore, WebhookEventStore};
use crate::webhook::payload::{EventKind, WebhookPayload};

pub struct CorrelationProcessor {
    messages: Arc<dyn MessageStore>,
    attempts: Arc<dyn AttemptStore>,
    events: Arc<dyn WebhookEventStore>,
    audit: Arc<dyn AuditSink>,
    /// Provider phone-number-id to concession code, from configuration.
    concessions: HashMap<String, String>,
}

impl CorrelationProcessor {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        attempts: Arc<dyn AttemptStore>,
        events: Arc<dyn WebhookEventStore>,
        audit: Arc<dyn AuditSink>,
        concessions: HashMap<String, String>,
    ) -> Self {
        Self {
            messages,
            attempts,
            events,
            audit,
            concessions,
        }
    }

    /// Ingest one callback delivery. The returned event is already
    /// persisted; its processing status reflects the outcome.
    pub fn ingest(&self, raw_payload: &str, source: &str, endpoint: &str) -> WebhookEvent {
        let mut event = WebhookEvent::new(
            source.to_string(),
            endpoint.to_string(),
            raw_payload.to_string(),
        );
        self.events.insert(event.clone());
        metrics::counter!("escalert_webhook_events_total").increment(1);

        let payload: WebhookPayload = match serde_json::from_str(raw_payload) {
            Ok(p) => p,
            Err(e) => {
                let err = WebhookError::MalformedPayload(e.to_string());
                tracing::warn!(source = %source, error = %err, "Webhook payload rejected");
                event.error_message = Some(err.to_string());
                event.advance_status(ProcessingStatus::Failed);
                self.events.update(&event);
                metrics::counter!("escalert_webhook_malformed_total").increment(1);
                return event;
            }
        };

        event.parsed_payload = serde_json::from_str(raw_payload).ok();
        event.advance_status(ProcessingStatus::Processing);

        if let Some(phone_number_id) = payload.phone_number_id() {
            event.concession_code = self
                .map_provider_identity(phone_number_id)
                .map(str::to_string);
        }

        let kind = payload.classify();
        match kind {
            EventKind::Status | EventKind::Error => {
                for entry in payload.status_entries() {
                    if event.external_message_id.is_none() {
                        event.external_message_id = Some(entry.id.clone());
                    }
                    match DeliveryState::from_provider_status(&entry.status) {
                        Some(state) => {
                            if let Some(message_id) = self.correlate_status(&entry.id, state) {
                                event.related_entity_type = Some("outbound_message".to_string());
                                event.related_entity_id = Some(message_id);
                            }
                        }
                        None => {
                            tracing::warn!(
                                external_id = %entry.id,
                                status = %entry.status,
                                "Unrecognized delivery status in callback"
                            );
                        }
                    }
                }
            }
            EventKind::Message => {
                for message in payload.inbound_messages() {
                    tracing::info!(
                        from = message.from.as_deref().unwrap_or("unknown"),
                        kind = message.kind.as_deref().unwrap_or("unknown"),
                        "Inbound user message received"
                    );
                }
            }
            EventKind::Unknown => {
                tracing::debug!(source = %source, "Webhook payload carries no known sections");
            }
        }

        event.advance_status(ProcessingStatus::Completed);
        self.events.update(&event);
        self.audit.record(AuditEvent::new(
            "webhook_processed",
            None,
            format!("source={} kind={:?}", source, kind),
        ));
        event
    }

    /// Advance the OutboundMessage known by `external_id` to `status`.
    ///
    /// Returns the message id when a matching message exists, correlated or
    /// not; `None` means the callback is uncorrelated (stored but orphan).
    /// Re-applying the current or an earlier status is a logged no-op, which
    /// is what makes duplicate webhook deliveries safe. The stores advance
    /// under their own write lock, so concurrent deliveries of out-of-order
    /// statuses cannot interleave a stale comparison with the write.
    pub fn correlate_status(
        &self,
        external_id: &str,
        status: DeliveryState,
    ) -> Option<uuid::Uuid> {
        let Some((message_id, advanced)) = self.messages.advance_by_external_id(external_id, status)
        else {
            tracing::warn!(
                external_id = %external_id,
                status = %status,
                "Callback for unknown message, stored uncorrelated"
            );
            return None;
        };

        if advanced {
            metrics::counter!(
                "escalert_deliveries_correlated_total",
                "status" => status.as_str()
            )
            .increment(1);
            tracing::info!(
                external_id = %external_id,
                message_id = %message_id,
                status = %status,
                "Delivery state advanced"
            );
        } else {
            tracing::debug!(
                external_id = %external_id,
                reported = %status,
                "Callback is a no-op for current delivery state"
            );
        }

        // Mirror the progression onto the originating attempt when one
        // exists for this external id.
        self.attempts.advance_by_external_id(external_id, status);

        Some(message_id)
    }

    /// Static provider-identity lookup. Unknown identifiers degrade to
    /// `None` with a warning; ingestion continues.
    pub fn map_provider_identity(&self, phone_number_id: &str) -> Option<&str> {
        match self.concessions.get(phone_number_id) {
            Some(code) => Some(code.as_str()),
            None => {
                tracing::warn!(
                    phone_number_id = %phone_number_id,
                    "Unknown provider phone identity"
                );
                None
            }
        }
    }

    /// Persist an inbound user message without touching delivery state.
    pub fn ingest_inbound_message(&self, raw_payload: &str, source: &str) -> WebhookEvent {
        self.ingest_passive(raw_payload, source, "/webhook/inbound")
    }

    /// Persist an out-of-band provider error without touching delivery state.
    pub fn ingest_out_of_band_error(&self, raw_payload: &str, source: &str) -> WebhookEvent {
        self.ingest_passive(raw_payload, source, "/webhook/errors")
    }

    fn ingest_passive(&self, raw_payload: &str, source: &str, endpoint: &str) -> WebhookEvent {
        let mut event = WebhookEvent::new(
            source.to_string(),
            endpoint.to_string(),
            raw_payload.to_string(),
        );
        self.events.insert(event.clone());

        match serde_json::from_str::<serde_json::Value>(raw_payload) {
            Ok(parsed) => {
                event.parsed_payload = Some(parsed);
                event.advance_status(ProcessingStatus::Completed);
            }
            Err(e) => {
                event.error_message =
                    Some(WebhookError::MalformedPayload(e.to_string()).to_string());
                event.advance_status(ProcessingStatus::Failed);
            }
        }
        self.events.update(&event);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutboundMessage;
    use crate::store::{
        MemoryAttemptStore, MemoryAuditLog, MemoryMessageStore, MemoryWebhookEventStore,
    };

    fn make_processor(
        messages: Arc<MemoryMessageStore>,
        events: Arc<MemoryWebhookEventStore>,
    ) -> CorrelationProcessor {
        CorrelationProcessor::new(
            messages,
            Arc::new(MemoryAttemptStore::new()),
            events,
            Arc::new(MemoryAuditLog::new()),
            HashMap::from([("111000111".to_string(), "NORTE".to_string())]),
        )
    }

    fn sent_message(external_id: &str) -> OutboundMessage {
        let mut msg = OutboundMessage::new(
            "34600111222".to_string(),
            "alerta".to_string(),
            vec![],
            None,
        );
        msg.mark_sent(external_id.to_string(), "111000111".to_string());
        msg
    }

    fn status_payload(id: &str, status: &str) -> String {
        format!(
            r#"{{"object":"whatsapp_business_account","entry":[{{"changes":[{{"value":{{"metadata":{{"phone_number_id":"111000111"}},"statuses":[{{"id":"{}","status":"{}"}}]}}}}]}}]}}"#,
            id, status
        )
    }

    #[test]
    fn correlates_and_advances_state() {
        let messages = Arc::new(MemoryMessageStore::new());
        let events = Arc::new(MemoryWebhookEventStore::new());
        messages.insert(sent_message("wamid.A1"));
        let processor = make_processor(messages.clone(), events.clone());

        let event = processor.ingest(&status_payload("wamid.A1", "delivered"), "whatsapp", "/webhook");

        assert_eq!(event.processing_status, ProcessingStatus::Completed);
        assert_eq!(event.concession_code.as_deref(), Some("NORTE"));
        assert_eq!(event.related_entity_type.as_deref(), Some("outbound_message"));
        assert_eq!(
            messages.get_by_external_id("wamid.A1").unwrap().state,
            DeliveryState::Delivered
        );
    }

    #[test]
    fn duplicate_callback_is_noop() {
        let messages = Arc::new(MemoryMessageStore::new());
        messages.insert(sent_message("wamid.A1"));
        let processor = make_processor(messages.clone(), Arc::new(MemoryWebhookEventStore::new()));

        processor.ingest(&status_payload("wamid.A1", "read"), "whatsapp", "/webhook");
        processor.ingest(&status_payload("wamid.A1", "delivered"), "whatsapp", "/webhook");

        assert_eq!(
            messages.get_by_external_id("wamid.A1").unwrap().state,
            DeliveryState::Read
        );
    }

    #[test]
    fn malformed_payload_is_persisted_failed() {
        let events = Arc::new(MemoryWebhookEventStore::new());
        let processor = make_processor(Arc::new(MemoryMessageStore::new()), events.clone());

        let event = processor.ingest("this is not json", "whatsapp", "/webhook");

        assert_eq!(event.processing_status, ProcessingStatus::Failed);
        assert!(event
            .error_message
            .as_deref()
            .unwrap()
            .contains("malformed webhook payload"));
        // Persisted despite the failure.
        assert!(events.get(event.id).is_some());
        assert_eq!(events.get(event.id).unwrap().raw_payload, "this is not json");
    }

    #[test]
    fn unknown_external_id_stays_uncorrelated() {
        let events = Arc::new(MemoryWebhookEventStore::new());
        let processor = make_processor(Arc::new(MemoryMessageStore::new()), events.clone());

        let event = processor.ingest(&status_payload("wamid.GHOST", "sent"), "whatsapp", "/webhook");

        assert_eq!(event.processing_status, ProcessingStatus::Completed);
        assert!(event.related_entity_id.is_none());
        assert_eq!(event.external_message_id.as_deref(), Some("wamid.GHOST"));
    }

    #[test]
    fn failed_status_correlates_and_terminates() {
        let messages = Arc::new(MemoryMessageStore::new());
        messages.insert(sent_message("wamid.A1"));
        let processor = make_processor(messages.clone(), Arc::new(MemoryWebhookEventStore::new()));

        processor.ingest(&status_payload("wamid.A1", "failed"), "whatsapp", "/webhook");
        assert_eq!(
            messages.get_by_external_id("wamid.A1").unwrap().state,
            DeliveryState::Failed
        );

        // Terminal: a later read callback cannot resurrect it.
        processor.ingest(&status_payload("wamid.A1", "read"), "whatsapp", "/webhook");
        assert_eq!(
            messages.get_by_external_id("wamid.A1").unwrap().state,
            DeliveryState::Failed
        );
    }

    #[test]
    fn unknown_provider_identity_degrades_gracefully() {
        let messages = Arc::new(MemoryMessageStore::new());
        messages.insert(sent_message("wamid.A1"));
        let processor = make_processor(messages.clone(), Arc::new(MemoryWebhookEventStore::new()));

        let payload = status_payload("wamid.A1", "delivered")
            .replace("111000111", "999999999");
        let event = processor.ingest(&payload, "whatsapp", "/webhook");

        assert_eq!(event.processing_status, ProcessingStatus::Completed);
        assert!(event.concession_code.is_none());
    }

    #[test]
    fn concurrent_out_of_order_callbacks_settle_on_furthest_state() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..2000 {
            let messages = Arc::new(MemoryMessageStore::new());
            messages.insert(sent_message("wamid.A1"));
            let processor = Arc::new(make_processor(
                messages.clone(),
                Arc::new(MemoryWebhookEventStore::new()),
            ));

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [DeliveryState::Read, DeliveryState::Delivered]
                .into_iter()
                .map(|status| {
                    let processor = processor.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        processor.correlate_status("wamid.A1", status);
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            // Whichever order the callbacks land in, read wins; delivered
            // must never overwrite it.
            assert_eq!(
                messages.get_by_external_id("wamid.A1").unwrap().state,
                DeliveryState::Read
            );
        }
    }

    #[test]
    fn passive_variants_never_touch_message_state() {
        let messages = Arc::new(MemoryMessageStore::new());
        messages.insert(sent_message("wamid.A1"));
        let processor = make_processor(messages.clone(), Arc::new(MemoryWebhookEventStore::new()));

        let raw = status_payload("wamid.A1", "failed");
        let event = processor.ingest_out_of_band_error(&raw, "whatsapp");

        assert_eq!(event.processing_status, ProcessingStatus::Completed);
        assert_eq!(
            messages.get_by_external_id("wamid.A1").unwrap().state,
            DeliveryState::Sent
        );
    }

    #[test]
    fn inbound_message_is_persisted_without_correlation() {
        let messages = Arc::new(MemoryMessageStore::new());
        messages.insert(sent_message("wamid.A1"));
        let events = Arc::new(MemoryWebhookEventStore::new());
        let processor = make_processor(messages.clone(), events.clone());

        let raw = r#"{"entry":[{"changes":[{"value":{"messages":[{"from":"34600111222","type":"text"}]}}]}]}"#;
        let event = processor.ingest_inbound_message(raw, "whatsapp");

        assert_eq!(event.processing_status, ProcessingStatus::Completed);
        assert_eq!(event.endpoint, "/webhook/inbound");
        assert!(event.parsed_payload.is_some());
        assert!(events.get(event.id).is_some());
        // A user replying never moves any outbound delivery state.
        assert_eq!(
            messages.get_by_external_id("wamid.A1").unwrap().state,
            DeliveryState::Sent
        );
    }
}
