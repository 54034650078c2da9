use axum::extract::{Path, State};
use axum::Json;
use coach_core::model::DialogMessage;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SolveBody {
    pub corrected: String,
}

/// POST /api/messages/:id/solve: settle a message the engine could not
/// process on its own.
pub async fn solve(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SolveBody>,
) -> Result<Json<DialogMessage>, AppError> {
    let engine = app.engine.clone();
    let solved = tokio::task::spawn_blocking(move || engine.mark_problem_solved(id, &body.corrected))
        .await
        .map_err(AppError::join)??;
    Ok(Json(solved))
}
