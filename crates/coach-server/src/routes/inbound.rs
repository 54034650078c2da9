use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use coach_core::engine::InboundMessage;
use coach_core::model::DialogOptionType;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InboundBody {
    pub sender: String,
    pub body: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub order: Option<u64>,
}

/// POST /api/inbound/:channel: queue a message received by a gateway.
///
/// The message is handled by the inbound worker; the response only confirms
/// that it was queued.
pub async fn receive(
    State(app): State<AppState>,
    Path(channel): Path<String>,
    Json(body): Json<InboundBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let channel: DialogOptionType = channel
        .parse()
        .map_err(|e: coach_core::CoachError| AppError::bad_request(e.to_string()))?;
    if body.sender.trim().is_empty() {
        return Err(AppError::bad_request("sender must not be empty"));
    }

    app.engine.enqueue(InboundMessage {
        channel,
        sender: body.sender,
        body: body.body,
        client_id: body.client_id,
        order: body.order,
        received_at: app.engine.now(),
    });
    app.inbound_wake.notify_one();

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": app.engine.inbox_len() })),
    ))
}
