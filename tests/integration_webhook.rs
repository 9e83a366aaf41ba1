//! Integration tests for the inbound webhook endpoint and delivery
//! correlation, exercised over real HTTP against an ephemeral listener.

use std::collections::HashMap;
use std::sync::Arc;

use escalert::model::{DeliveryState, OutboundMessage, ProcessingStatus};
use escalert::store::{
    MemoryAttemptStore, MemoryAuditLog, MemoryMessageStore, MemoryWebhookEventStore, MessageStore,
};
use escalert::webhook::{router, CorrelationProcessor, WebhookState};
use serde_json::json;

struct TestApp {
    base_url: String,
    messages: Arc<MemoryMessageStore>,
    events: Arc<MemoryWebhookEventStore>,
}

async fn spawn_app() -> TestApp {
    let messages = Arc::new(MemoryMessageStore::new());
    let events = Arc::new(MemoryWebhookEventStore::new());
    let processor = Arc::new(CorrelationProcessor::new(
        messages.clone(),
        Arc::new(MemoryAttemptStore::new()),
        events.clone(),
        Arc::new(MemoryAuditLog::new()),
        HashMap::from([("111000111".to_string(), "NORTE".to_string())]),
    ));

    let app = router(WebhookState {
        processor,
        verify_token: "verify-me".to_string(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });

    TestApp {
        base_url: format!("http://{}", addr),
        messages,
        events,
    }
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

fn status_payload(entries: serde_json::Value) -> serde_json::Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "entry-1",
            "changes": [{
                "value": {
                    "metadata": {"phone_number_id": "111000111"},
                    "statuses": entries
                },
                "field": "messages"
            }]
        }]
    })
}

#[tokio::test]
async fn verification_handshake_echoes_challenge() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345",
            app.base_url
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "12345");
}

#[tokio::test]
async fn verification_with_wrong_token_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345",
            app.base_url
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn delivery_progression_is_monotonic_over_http() {
    let app = spawn_app().await;
    app.messages.insert(sent_message("wamid.A1"));
    let client = reqwest::Client::new();
    let url = format!("{}/webhook", app.base_url);

    for status in ["delivered", "read"] {
        let response = client
            .post(&url)
            .json(&status_payload(json!([{"id": "wamid.A1", "status": status}])))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }
    assert_eq!(
        app.messages.get_by_external_id("wamid.A1").unwrap().state,
        DeliveryState::Read
    );

    // A late delivered callback does not regress the state.
    client
        .post(&url)
        .json(&status_payload(json!([{"id": "wamid.A1", "status": "delivered"}])))
        .send()
        .await
        .unwrap();
    assert_eq!(
        app.messages.get_by_external_id("wamid.A1").unwrap().state,
        DeliveryState::Read
    );
}

#[tokio::test]
async fn failed_status_wins_over_sibling_statuses() {
    let app = spawn_app().await;
    app.messages.insert(sent_message("wamid.A1"));
    app.messages.insert(sent_message("wamid.A2"));
    let client = reqwest::Client::new();

    // One payload carrying a delivered and a failed entry: the event is
    // error-classified and the failed entry still correlates.
    let payload = status_payload(json!([
        {"id": "wamid.A1", "status": "delivered"},
        {"id": "wamid.A2", "status": "failed", "errors": [{"code": 131026}]}
    ]));
    let response = client
        .post(format!("{}/webhook", app.base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(
        app.messages.get_by_external_id("wamid.A1").unwrap().state,
        DeliveryState::Delivered
    );
    assert_eq!(
        app.messages.get_by_external_id("wamid.A2").unwrap().state,
        DeliveryState::Failed
    );
}

#[tokio::test]
async fn malformed_payload_is_acked_and_persisted_failed() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhook", app.base_url))
        .header("content-type", "application/json")
        .body("this is not json at all")
        .send()
        .await
        .unwrap();

    // The provider still gets a 200 so it stops redelivering.
    assert_eq!(response.status().as_u16(), 200);

    let events = app.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].processing_status, ProcessingStatus::Failed);
    assert_eq!(events[0].raw_payload, "this is not json at all");
    assert!(events[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("malformed webhook payload"));
}

#[tokio::test]
async fn unknown_external_id_is_stored_uncorrelated() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhook", app.base_url))
        .json(&status_payload(json!([{"id": "wamid.GHOST", "status": "sent"}])))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let events = app.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].processing_status, ProcessingStatus::Completed);
    assert!(events[0].related_entity_id.is_none());
    assert_eq!(events[0].external_message_id.as_deref(), Some("wamid.GHOST"));
    assert_eq!(events[0].concession_code.as_deref(), Some("NORTE"));
}

#[tokio::test]
async fn inbound_user_messages_are_archived_without_correlation() {
    let app = spawn_app().await;
    app.messages.insert(sent_message("wamid.A1"));
    let client = reqwest::Client::new();

    let payload = json!({
        "entry": [{
            "changes": [{
                "value": {
                    "metadata": {"phone_number_id": "111000111"},
                    "messages": [{"from": "34600111222", "type": "text"}]
                }
            }]
        }]
    });
    let response = client
        .post(format!("{}/webhook/inbound", app.base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let events = app.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].processing_status, ProcessingStatus::Completed);
    assert_eq!(events[0].endpoint, "/webhook/inbound");
    assert_eq!(
        app.messages.get_by_external_id("wamid.A1").unwrap().state,
        DeliveryState::Sent
    );
}

#[tokio::test]
async fn out_of_band_errors_never_touch_delivery_state() {
    let app = spawn_app().await;
    app.messages.insert(sent_message("wamid.A1"));
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/webhook/errors", app.base_url))
        .json(&status_payload(json!([{"id": "wamid.A1", "status": "failed"}])))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(
        app.messages.get_by_external_id("wamid.A1").unwrap().state,
        DeliveryState::Sent
    );
    assert_eq!(app.events.all().len(), 1);
}
