use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures of the pure scheduling core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Failures reported by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if is_constraint_violation(&e) {
            StoreError::Conflict(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

/// Failures of the booking orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<SchedulingError> for BookingError {
    fn from(e: SchedulingError) -> Self {
        BookingError::InvalidInput(e.to_string())
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => BookingError::NotFound(what),
            StoreError::Conflict(msg) => BookingError::Conflict(msg),
            StoreError::Unavailable(msg) => BookingError::Unavailable(msg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    RateLimited(String),
}

impl From<BookingError> for AppError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::InvalidInput(msg) => AppError::InvalidInput(msg),
            BookingError::NotFound(msg) => AppError::NotFound(msg),
            BookingError::Conflict(msg) => AppError::Conflict(msg),
            BookingError::Unavailable(msg) => AppError::Unavailable(msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        BookingError::from(e).into()
    }
}

impl From<SchedulingError> for AppError {
    fn from(e: SchedulingError) -> Self {
        AppError::InvalidInput(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(e) if is_constraint_violation(e) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
