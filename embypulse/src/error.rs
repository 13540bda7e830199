//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// The variants mirror the failure modes callers branch on: transport problems and
/// timeouts are transient, auth failures mean a channel credential must be refreshed,
/// malformed responses are downgraded by the caller instead of propagated.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Http(err)
        }
    }
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthFailure(msg.into())
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_))
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure(_))
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Timeout(_) => "timeout",
            Self::AuthFailure(_) => "auth_failure",
            Self::MalformedResponse(_) => "malformed_response",
            Self::NotFound { .. } => "not_found",
            Self::DatabaseSqlx(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}
