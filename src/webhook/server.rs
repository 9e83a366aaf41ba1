//! HTTP endpoint receiving provider callbacks.
//!
//! POST deliveries are always acknowledged with 200 once the event is
//! persisted, even when the payload is garbage; anything else makes the
//! provider hammer the endpoint with redeliveries.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::webhook::processor::CorrelationProcessor;

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<CorrelationProcessor>,
    pub verify_token: String,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .route("/webhook/inbound", post(receive_inbound))
        .route("/webhook/errors", post(receive_error))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// Run the HTTP listener until shutdown. `app` is the webhook router, plus
/// whatever else shares the port (the alert API in the daemon).
pub async fn serve(port: u16, app: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Subscription verification handshake: echo the challenge when the verify
/// token matches.
async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") && token == Some(state.verify_token.as_str()) {
        tracing::info!("Webhook subscription verified");
        (StatusCode::OK, challenge)
    } else {
        tracing::warn!(?mode, error = %crate::error::WebhookError::VerificationFailed, "Webhook subscription rejected");
        (StatusCode::FORBIDDEN, String::new())
    }
}

async fn receive(State(state): State<WebhookState>, body: String) -> impl IntoResponse {
    // Persist-first happens inside the processor; the ack does not depend
    // on the processing outcome.
    let event = state.processor.ingest(&body, "whatsapp", "/webhook");
    tracing::debug!(event_id = %event.id, status = ?event.processing_status, "Webhook acked");
    (StatusCode::OK, "EVENT_RECEIVED")
}

async fn receive_inbound(State(state): State<WebhookState>, body: String) -> impl IntoResponse {
    let event = state.processor.ingest_inbound_message(&body, "whatsapp");
    tracing::debug!(event_id = %event.id, "Inbound message acked");
    (StatusCode::OK, "EVENT_RECEIVED")
}

async fn receive_error(State(state): State<WebhookState>, body: String) -> impl IntoResponse {
    let event = state.processor.ingest_out_of_band_error(&body, "whatsapp");
    tracing::debug!(event_id = %event.id, "Out-of-band error acked");
    (StatusCode::OK, "EVENT_RECEIVED")
}
