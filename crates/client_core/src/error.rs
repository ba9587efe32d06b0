use shared::{domain::BlogId, error::ApiException, validation::FieldErrors};
use thiserror::Error;

/// Failures talking to the comment backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Api(#[from] ApiException),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the comment synchronizer. Cloned into every observer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("failed to load comments for '{blog_id}': {reason}")]
    LoadFailure { blog_id: BlogId, reason: String },
    #[error("live updates for '{blog_id}' unavailable: {reason}")]
    SubscriptionFailure { blog_id: BlogId, reason: String },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("validation failed: {}", .0.summary())]
    Validation(FieldErrors),
    #[error("{message}")]
    Submission {
        message: String,
        #[source]
        source: BackendError,
    },
    #[error("a submission is already in progress")]
    InFlight,
}
