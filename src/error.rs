use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::response::ApiResponse;

pub type AppResult<T> = Result<T, AppError>;

/// Failures surfaced by the services; each maps onto one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or missing input (400). The message names the field.
    #[error("{0}")]
    Validation(String),

    /// Uniqueness violation, e.g. an email that is already registered (400).
    #[error("{0}")]
    Conflict(String),

    /// Missing, invalid or expired identity proof, or bad credentials (401).
    #[error("{0}")]
    Auth(String),

    /// Authenticated, but the resource belongs to someone else (403).
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_authenticated() -> Self {
        AppError::Auth("Not authenticated".into())
    }

    pub fn invalid_credentials() -> Self {
        AppError::Auth("Invalid email or password".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                error!(error = ?e, "request failed");
                "Something went wrong".to_string()
            }
            other => other.to_string(),
        };
        (status, ApiResponse::<()>::failure(message)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "rejected request body");
        AppError::Validation("Request body must be valid JSON".into())
    }
}

/// Errors raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already exists")]
    DuplicateEmail,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AppError::Conflict("Email already exists".into()),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}
