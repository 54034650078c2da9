use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use coach_core::model::{DialogMessage, DialogStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/participants/:id/messages: the dialog in `order`.
pub async fn list_messages(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DialogMessage>>, AppError> {
    let engine = app.engine.clone();
    let messages = tokio::task::spawn_blocking(move || engine.participant_messages(id))
        .await
        .map_err(AppError::join)??;
    Ok(Json(messages))
}

/// GET /api/participants/:id/status
pub async fn get_status(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DialogStatus>, AppError> {
    let engine = app.engine.clone();
    let status = tokio::task::spawn_blocking(move || engine.participant_status(id))
        .await
        .map_err(AppError::join)??;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct ManualMessageBody {
    pub text: String,
    #[serde(default)]
    pub supervisor: bool,
    #[serde(default)]
    pub reply_window_minutes: Option<u32>,
}

/// POST /api/participants/:id/messages: queue a manual message.
pub async fn send_message(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ManualMessageBody>,
) -> Result<(StatusCode, Json<DialogMessage>), AppError> {
    if body.text.trim().is_empty() {
        return Err(AppError::bad_request("text must not be empty"));
    }
    let engine = app.engine.clone();
    let message = tokio::task::spawn_blocking(move || {
        engine.send_manual_message(id, &body.text, body.supervisor, body.reply_window_minutes)
    })
    .await
    .map_err(AppError::join)??;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct VariableBody {
    pub name: String,
    pub value: String,
}

/// PUT /api/participants/:id/variables: set one participant variable.
pub async fn put_variable(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<VariableBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let name = body.name.clone();
    tokio::task::spawn_blocking(move || engine.participant_adjust_variable(id, &body.name, &body.value))
        .await
        .map_err(AppError::join)??;
    Ok(Json(serde_json::json!({ "participant": id, "name": name })))
}

#[derive(Debug, Deserialize)]
pub struct SwitchMonitoringBody {
    pub participants: Vec<Uuid>,
}

/// POST /api/participants/monitoring: toggle monitoring of each participant.
pub async fn switch_monitoring(
    State(app): State<AppState>,
    Json(body): Json<SwitchMonitoringBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let switched =
        tokio::task::spawn_blocking(move || engine.participants_switch_monitoring(&body.participants))
            .await
            .map_err(AppError::join)??;
    let list: Vec<serde_json::Value> = switched
        .iter()
        .map(|p| serde_json::json!({ "id": p.id, "monitoring_active": p.monitoring_active }))
        .collect();
    Ok(Json(serde_json::json!(list)))
}
