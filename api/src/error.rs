use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dosegate_core::decision::InputError;
use dosegate_core::error::{self, ApiError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        let received = match &err {
            InputError::InvalidAmount { value, .. } => Some(serde_json::json!(value)),
            InputError::IncompleteTempBasal => None,
        };
        AppError::Validation {
            message: err.to_string(),
            field: Some(err.field().to_string()),
            received,
            docs_hint: Some(
                "Amounts must be finite and non-negative; send tbrRate and tbrMin together or not at all."
                    .to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
        };

        (status, Json(api_error)).into_response()
    }
}
