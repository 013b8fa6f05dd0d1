// Mapping service failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use baht_app::currency::CurrencyError;
use baht_app::storage::StorageError;
use baht_app::ServiceError;
use baht_core::model::WorkflowError;
use baht_llm::LlmError;
use serde::Serialize;
use tracing::error;

/// Error returned by every handler, rendered as `{"success": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(err: &dyn std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Validation(_) | ServiceError::Tax(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Workflow(w) => match w {
                WorkflowError::SelfApproval => StatusCode::FORBIDDEN,
                WorkflowError::MissingReason => StatusCode::UNPROCESSABLE_ENTITY,
                WorkflowError::InvalidTransition { .. } | WorkflowError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
            },
            ServiceError::Currency(CurrencyError::Lookup(_)) => return Self::internal(&err),
            ServiceError::Currency(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Llm(e) => match e {
                LlmError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                LlmError::Quota(_) => StatusCode::TOO_MANY_REQUESTS,
                LlmError::Safety(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_GATEWAY,
            },
            ServiceError::Storage(e) => match e {
                StorageError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                StorageError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                StorageError::Io(_) => return Self::internal(&err),
                _ => StatusCode::BAD_GATEWAY,
            },
            ServiceError::Internal(e) => return Self::internal(e),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %err, "upstream failure");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::from(err).into()
    }
}
