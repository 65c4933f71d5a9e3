use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hostbox_sandbox::HostingError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Main application error type that all handlers should return
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Hosting(#[from] HostingError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Structured error response format for API consistency
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
    request_id: String,
}

/// Error detail structure with machine-readable codes
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    /// Provisioning step that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<&'static str>,
}

impl AppError {
    /// Convert AppError to appropriate HTTP status code and error code
    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Hosting(err) => {
                let status = match err {
                    HostingError::InvalidName(_) => StatusCode::BAD_REQUEST,
                    HostingError::NotFound(_) => StatusCode::NOT_FOUND,
                    HostingError::Conflict(_) => StatusCode::CONFLICT,
                    HostingError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
                    HostingError::Build { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    HostingError::SourceFetch { .. }
                    | HostingError::Launch { .. }
                    | HostingError::ProxyReload(_)
                    | HostingError::Runtime(_) => StatusCode::BAD_GATEWAY,
                    HostingError::RouteWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
        }
    }

    /// Get user-friendly error message (sanitized for external consumption)
    fn to_user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("Validation failed: {}", msg),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
            AppError::Hosting(HostingError::RouteWrite { hostname, .. }) => {
                format!("Failed to write proxy route for {}", hostname)
            }
            AppError::Hosting(err) => err.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status_code, error_code) = self.to_status_and_code();
        let user_message = self.to_user_message();

        // Log internal errors with full context but don't expose details
        if status_code.is_server_error() {
            error!(
                request_id = %request_id,
                error_code = %error_code,
                error = %self,
                "Server error occurred"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                error_code = %error_code,
                error = %self,
                "API error response"
            );
        }

        let step = match &self {
            AppError::Hosting(err) => err.step().map(|s| s.as_str()),
            _ => None,
        };

        let error_response = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: error_code.to_string(),
                message: user_message,
                step,
            },
            request_id,
        };

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;
