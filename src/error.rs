use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found")]
    NotFound,

    #[error("access denied")]
    AccessDenied,

    #[error("forbidden")]
    Forbidden,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("content rejected: {0}")]
    ContentRejected(String),

    #[error("spam detected")]
    SpamDetected,

    #[error("edit window expired (max_edit_hours: {max_edit_hours})")]
    EditWindowExpired { max_edit_hours: i64 },

    #[error("dialog already archived")]
    AlreadyArchived,

    #[error("operation not supported by the active storage backend: {0}")]
    Unsupported(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => {
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            AppError::Storage(_) | AppError::Internal => true,
            _ => false,
        }
    }

    /// Logical status code for callers that map errors onto a wire protocol.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::ContentRejected(_) | AppError::SpamDetected => 400,
            AppError::AccessDenied | AppError::Forbidden => 403,
            AppError::EditWindowExpired { .. } => 403,
            AppError::NotFound => 404,
            AppError::Conflict(_) | AppError::AlreadyArchived => 409,
            AppError::InvariantViolation(_) => 422,
            AppError::Unsupported(_) => 501,
            _ => 500,
        }
    }
}

impl From<scylla::transport::errors::QueryError> for AppError {
    fn from(e: scylla::transport::errors::QueryError) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<scylla::transport::errors::NewSessionError> for AppError {
    fn from(e: scylla::transport::errors::NewSessionError) -> Self {
        AppError::Storage(e.to_string())
    }
}
