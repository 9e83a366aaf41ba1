//! HTTP surface for operating on alerts.
//!
//! Thin axum handlers over the lifecycle manager: every HTTP-driven
//! transition goes through the same audit, metrics and dispatch paths as
//! the sweep. Invalid transitions come back 200 with the unchanged alert,
//! matching the manager's logged-no-op semantics.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::lifecycle::AlertManager;
use crate::model::{Alert, Severity};

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub alert_type: String,
    pub source_type: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub reason: String,
    #[serde(default)]
    pub target_level: Option<usize>,
}

pub fn router(manager: Arc<AlertManager>) -> Router {
    Router::new()
        .route("/alerts", post(create))
        .route("/alerts/:id/acknowledge", post(acknowledge))
        .route("/alerts/:id/resolve", post(resolve))
        .route("/alerts/:id/escalate", post(escalate))
        .with_state(manager)
}

/// Create an alert; the level-0 notification wave is dispatched before the
/// response is written.
async fn create(
    State(manager): State<Arc<AlertManager>>,
    Json(req): Json<CreateAlertRequest>,
) -> impl IntoResponse {
    let alert = manager
        .create_alert(
            req.title,
            req.description,
            req.severity,
            req.alert_type,
            req.source_type,
            req.source_id,
            req.metadata,
        )
        .await;
    (StatusCode::CREATED, Json(alert))
}

async fn acknowledge(
    State(manager): State<Arc<AlertManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Response {
    respond(manager.acknowledge(id, &req.actor))
}

async fn resolve(
    State(manager): State<Arc<AlertManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Response {
    respond(manager.resolve(id, &req.actor, req.notes))
}

async fn escalate(
    State(manager): State<Arc<AlertManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<EscalateRequest>,
) -> Response {
    respond(manager.manual_escalate(id, &req.reason, req.target_level).await)
}

fn respond(result: Result<Alert, LifecycleError>) -> Response {
    match result {
        Ok(alert) => (StatusCode::OK, Json(alert)).into_response(),
        Err(err @ LifecycleError::AlertNotFound(_)) => {
            (StatusCode::NOT_FOUND, err.to_string()).into_response()
        }
        Err(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response(),
    }
}
