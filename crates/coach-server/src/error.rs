use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coach_core::CoachError;

// ---------------------------------------------------------------------------
// Internal sentinel for request validation errors
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 400 through the `anyhow::Error` chain for
/// problems found in the request itself rather than by the engine.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn join(err: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {err}"))
    }
}

fn status_of(err: &CoachError) -> StatusCode {
    match err {
        CoachError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        CoachError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoachError::WriteProtectedVariable(_)
        | CoachError::InvalidVariableName(_)
        | CoachError::InvalidStatus(_)
        | CoachError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        CoachError::CaseCantBeSolvedAnymore(_, _) => StatusCode::CONFLICT,
        CoachError::InvalidTransition { .. } | CoachError::NoContactData(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CoachError::Store(_)
        | CoachError::Transport(_)
        | CoachError::Io(_)
        | CoachError::Yaml(_)
        | CoachError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<BadRequestError>().is_some() {
            StatusCode::BAD_REQUEST
        } else if let Some(e) = self.0.downcast_ref::<CoachError>() {
            status_of(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::error!("request failed: {:#}", self.0);
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
