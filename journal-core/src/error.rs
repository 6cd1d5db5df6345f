use thiserror::Error;

use crate::models::{EntryId, SessionId};

/// Startup configuration problems. Always fatal, raised before any network call.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Entry Store failures, split so callers can decide whether a retry makes sense.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Entry store unreachable: {0}")]
    Unreachable(String),

    #[error("Entry store rejected the operation: {0}")]
    Rejected(String),

    #[error("Journal entry {0} not found")]
    NotFound(EntryId),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unreachable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Unreachable(err.to_string()),
            other => StorageError::Rejected(other.to_string()),
        }
    }
}

/// Webhook Gateway failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway request timed out: {0}")]
    Timeout(String),

    #[error("Gateway unreachable: {0}")]
    Network(String),

    #[error("Gateway rejected credentials (HTTP {status})")]
    Unauthenticated { status: u16 },

    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("Gateway reported failure: {message}")]
    UpstreamFailure { status: Option<u16>, message: String },
}

impl GatewayError {
    /// Transport-level failures that may be retried with the same idempotency key.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Network(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::MalformedResponse(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Chat session {0} not found")]
    NotFound(SessionId),
}

#[derive(Error, Debug)]
pub enum JournalError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
