// Application errors shared by the receipt workflows, the REST API and the CLI

use crate::db::{is_unique_violation, InsufficientStock, StockLimitExceeded};
use crate::schema::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<ValidationError>),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Single-field validation failure
    pub fn invalid(field: &str, message: impl Into<String>, context: &str) -> Self {
        AppError::Validation(vec![ValidationError::new(field, message, context)])
    }

    /// Map a persistence error, turning unique-index violations into a Conflict
    pub fn conflict_on_unique(err: anyhow::Error, message: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            AppError::Conflict(message.into())
        } else {
            AppError::from(err)
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(self, AppError::Storage(_) | AppError::Internal(_))
    }
}

/// Persistence errors: stock shortfalls are conflicts, stock past the cap is
/// a validation failure, the rest is internal
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(shortfall) = err.downcast_ref::<InsufficientStock>() {
            return AppError::Conflict(shortfall.to_string());
        }
        match err.downcast_ref::<StockLimitExceeded>() {
            Some(limit) => AppError::invalid("stock", limit.to_string(), "Item"),
            None => AppError::Internal(err),
        }
    }
}

impl From<Vec<ValidationError>> for AppError {
    fn from(errors: Vec<ValidationError>) -> Self {
        AppError::Validation(errors)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(feature = "server")]
mod http {
    use super::AppError;
    use crate::schema::ValidationError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    };
    use serde::Serialize;

    #[derive(Serialize)]
    struct ErrorBody {
        success: bool,
        error: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        details: Vec<ValidationError>,
    }

    impl AppError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
                AppError::NotFound { .. } => StatusCode::NOT_FOUND,
                AppError::Conflict(_) => StatusCode::CONFLICT,
                AppError::Forbidden(_) => StatusCode::FORBIDDEN,
                AppError::Storage(_) | AppError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = self.status_code();

            if !self.is_client_error() {
                tracing::error!(error = %self, "request failed");
            }

            let (error, details) = match self {
                AppError::Validation(details) => ("Validation failed".to_string(), details),
                AppError::Storage(_) | AppError::Internal(_) => {
                    ("Internal server error".to_string(), Vec::new())
                }
                other => (other.to_string(), Vec::new()),
            };

            let body = ErrorBody {
                success: false,
                error,
                details,
            };

            (status, Json(body)).into_response()
        }
    }
}
