use thiserror::Error;

/// Message shown to the operator whenever an agent could not be reached
pub const AGENT_UNREACHABLE: &str = "Connection to agent failed";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote endpoint answered with `success: false`
    #[error("{0}")]
    Application(String),

    /// The request could not complete (network failure or malformed reply).
    /// The detail is only ever logged, never shown.
    #[error("Connection to agent failed")]
    Transport { detail: String },

    /// The agent answered, but not with a readable envelope. Shown like a
    /// transport failure; pollers only log it.
    #[error("Connection to agent failed")]
    MalformedReply { detail: String },

    /// Input rejected locally before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown agent or preset
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error from the preset key-value store
    #[error("Storage error: {0}")]
    Storage(String),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AppError {
    pub fn transport(detail: impl Into<String>) -> Self {
        AppError::Transport { detail: detail.into() }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        AppError::MalformedReply { detail: detail.into() }
    }

    /// Text stored in an agent's `error` field
    pub fn operator_message(&self) -> String {
        match self {
            AppError::Application(message) => message.clone(),
            AppError::Transport { .. } | AppError::MalformedReply { .. } => AGENT_UNREACHABLE.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the error came back from (or on the way to) a remote agent
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::Application(_) | AppError::Transport { .. } | AppError::MalformedReply { .. }
        )
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::transport(e.to_string())
    }
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;
