use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing configuration value: {0}")]
    MissingConfig(&'static str),
    #[error("{entity} with id {id} does not exist")]
    NotFound { entity: &'static str, id: i64 },
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        AppError::NotFound { entity, id }
    }
}
