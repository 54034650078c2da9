use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("not initialized: run 'coach init'")]
    NotInitialized,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("variable '{0}' is write protected")]
    WriteProtectedVariable(String),

    #[error("invalid variable name '{0}': must match $[a-zA-Z0-9_]+")]
    InvalidVariableName(String),

    #[error("invalid dialog message status: {0}")]
    InvalidStatus(String),

    #[error("case can't be solved anymore: dialog message {0} is {1}")]
    CaseCantBeSolvedAnymore(String, String),

    #[error("participant {0} has no contact data for monitoring")]
    NoContactData(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoachError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoachError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoachError>;
