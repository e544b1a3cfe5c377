use crate::{
    models::digest::DigestError,
    repository::RepositoryError,
    services::{batch::BatchError, search::SearchError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

fn repository_status(err: &RepositoryError) -> StatusCode {
    match err {
        RepositoryError::ObjectNotFound(_) | RepositoryError::DatastreamNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        RepositoryError::InvalidChecksum { .. } => StatusCode::CONFLICT,
        RepositoryError::Digest(_) | RepositoryError::InvalidIdentifier(_) => {
            StatusCode::BAD_REQUEST
        }
        RepositoryError::Query(_) | RepositoryError::Sqlx(_) | RepositoryError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::new(repository_status(&err), err.to_string())
    }
}

impl From<BatchError> for AppError {
    fn from(err: BatchError) -> Self {
        let status = match &err {
            BatchError::InvalidChecksum { .. } => StatusCode::CONFLICT,
            BatchError::PartialFailure { source, .. } => repository_status(source),
            BatchError::Repository(source) => repository_status(source),
        };
        AppError::new(status, err.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidPageSize => AppError::bad_request(err.to_string()),
            SearchError::Query(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<DigestError> for AppError {
    fn from(err: DigestError) -> Self {
        AppError::bad_request(err.to_string())
    }
}
