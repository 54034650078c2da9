use axum::extract::State;
use axum::Json;
use coach_core::engine::InterventionStatistics;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/statistics: message counts per active intervention.
pub async fn get_statistics(
    State(app): State<AppState>,
) -> Result<Json<Vec<InterventionStatistics>>, AppError> {
    let engine = app.engine.clone();
    let stats = tokio::task::spawn_blocking(move || engine.statistics())
        .await
        .map_err(AppError::join)??;
    Ok(Json(stats))
}
