//! Inbound webhook payload shapes from the messaging provider.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub statuses: Vec<StatusEntry>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

/// One delivery-status callback for a previously sent message.
#[derive(Debug, Deserialize)]
pub struct StatusEntry {
    /// External message id assigned at send time.
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

/// A message a user sent to us, out of band.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<InboundText>,
}

#[derive(Debug, Deserialize)]
pub struct InboundText {
    #[serde(default)]
    pub body: String,
}

/// Event classification with the failed-precedence rule applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    Message,
    Error,
    Unknown,
}

impl WebhookPayload {
    pub fn status_entries(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entry
            .iter()
            .flat_map(|e| &e.changes)
            .flat_map(|c| &c.value.statuses)
    }

    pub fn inbound_messages(&self) -> impl Iterator<Item = &InboundMessage> {
        self.entry
            .iter()
            .flat_map(|e| &e.changes)
            .flat_map(|c| &c.value.messages)
    }

    pub fn phone_number_id(&self) -> Option<&str> {
        self.entry
            .iter()
            .flat_map(|e| &e.changes)
            .filter_map(|c| c.value.metadata.as_ref())
            .filter_map(|m| m.phone_number_id.as_deref())
            .next()
    }

    fn has_errors(&self) -> bool {
        self.entry
            .iter()
            .flat_map(|e| &e.changes)
            .any(|c| !c.value.errors.is_empty())
    }

    /// Classify the whole payload. A single `failed` status entry makes the
    /// event error-type even when non-failed statuses are present alongside.
    pub fn classify(&self) -> EventKind {
        if self.status_entries().any(|s| s.status == "failed") || self.has_errors() {
            return EventKind::Error;
        }
        if self.status_entries().next().is_some() {
            return EventKind::Status;
        }
        if self.inbound_messages().next().is_some() {
            return EventKind::Message;
        }
        EventKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_payload(statuses: &str) -> WebhookPayload {
        let raw = format!(
            r#"{{"object":"whatsapp_business_account","entry":[{{"id":"e1","changes":[{{"value":{{"metadata":{{"phone_number_id":"111000111"}},"statuses":{}}},"field":"messages"}}]}}]}}"#,
            statuses
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn classifies_plain_status() {
        let payload =
            status_payload(r#"[{"id":"wamid.A1","status":"delivered","timestamp":"170"}]"#);
        assert_eq!(payload.classify(), EventKind::Status);
        assert_eq!(payload.phone_number_id(), Some("111000111"));
    }

    #[test]
    fn failed_status_takes_precedence_over_others() {
        let payload = status_payload(
            r#"[{"id":"wamid.A1","status":"delivered"},{"id":"wamid.A2","status":"failed"}]"#,
        );
        assert_eq!(payload.classify(), EventKind::Error);
    }

    #[test]
    fn classifies_inbound_message() {
        let raw = r#"{"entry":[{"changes":[{"value":{"messages":[{"id":"wamid.M1","from":"34600111222","type":"text","text":{"body":"ok"}}]}}]}]}"#;
        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.classify(), EventKind::Message);
    }

    #[test]
    fn empty_payload_is_unknown() {
        let payload: WebhookPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload.classify(), EventKind::Unknown);
    }
}
