//! Error types for UiProof

use thiserror::Error;

/// Result type alias using UiProof Error
pub type Result<T> = std::result::Result<T, Error>;

/// UiProof error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Another run is already in progress")]
    AlreadyRunning,

    #[error("Run {run_id} already exists")]
    DuplicateRun { run_id: String },

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Report rendering error: {0}")]
    Render(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Run deadline exceeded after {seconds}s")]
    DeadlineExceeded { seconds: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors surfaced synchronously to a starting caller, with no state
    /// mutated on the server side.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(self, Error::AlreadyRunning | Error::DuplicateRun { .. })
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}
