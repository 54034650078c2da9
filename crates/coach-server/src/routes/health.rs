use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/health: liveness plus the inbox backlog.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "inbox": app.engine.inbox_len(),
        "now": app.engine.now(),
    }))
}
