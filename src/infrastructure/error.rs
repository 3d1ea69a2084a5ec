use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timer not found: {0}")]
    TimerNotFound(String),
    #[error("timer already exists: {0}")]
    DuplicateTimer(String),
    #[error("no current user")]
    NoCurrentUser,
    #[error("calendar error: {0}")]
    Calendar(String),
    #[error("credential error: {0}")]
    Credential(String),
    #[error("store lock busy: {0}")]
    LockBusy(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
