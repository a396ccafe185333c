use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::questionnaire::error::QuestionnaireError;
use crate::questionnaire::import::ImportError;
use crate::questionnaire::store::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<QuestionnaireError> for AppError {
    fn from(err: QuestionnaireError) -> Self {
        match err {
            QuestionnaireError::NotFound(msg) => AppError::NotFound(msg),
            QuestionnaireError::Invalid(msg) => AppError::Validation(msg),
            QuestionnaireError::Conflict(msg) => AppError::Conflict(msg),
            QuestionnaireError::Store(store) => match store {
                StoreError::NotFound(msg) => AppError::NotFound(msg),
                e @ (StoreError::UniqueViolation(_) | StoreError::ConcurrencyConflict { .. }) => {
                    AppError::Conflict(e.to_string())
                }
                StoreError::Database(e) => AppError::Database(e),
                e @ StoreError::Corrupt(_) => AppError::Internal(e.into()),
            },
        }
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Sheet(e) => AppError::UnprocessableEntity(e.to_string()),
            ImportError::Questionnaire(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questionnaire::import::sheet::SheetError;

    #[test]
    fn test_questionnaire_errors_map_to_status() {
        let cases = [
            (QuestionnaireError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (QuestionnaireError::Invalid("x".into()), StatusCode::BAD_REQUEST),
            (QuestionnaireError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                QuestionnaireError::Store(StoreError::UniqueViolation("k".into())),
                StatusCode::CONFLICT,
            ),
            (
                QuestionnaireError::Store(StoreError::Corrupt("bad".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_sheet_errors_are_unprocessable() {
        let err = AppError::from(ImportError::Sheet(SheetError::MissingHeader));
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
