//! Error types for eventgate.

use thiserror::Error;

use crate::model::EventId;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input. User-correctable.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The store already holds an event with this key for the org.
    /// Expected during ingestion; callers classify it rather than fail.
    #[error("duplicate event: {event_key}")]
    DuplicateEvent {
        event_key: String,
        existing_event_id: Option<EventId>,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A conditional write lost to a concurrent writer at the same status.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code, surfaced in import results and problem details.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::DuplicateEvent { .. } => "DUPLICATE_EVENT",
            Error::Timeout { .. } => "TIMEOUT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::Conflict(_) => "CONFLICT",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "SERIALIZATION_ERROR",
            Error::Csv(_) => "CSV_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Delivery(_) => "DELIVERY_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateEvent { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
