// Error handling module
// Defines engine error kinds and their HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the token lifecycle, report and query paths
#[derive(Error, Debug)]
pub enum ApiError {
    /// Credential rejected after one refresh, or the refresh itself failed
    #[error("Authorization failed: {0}")]
    AuthError(String),

    /// Connection, timeout or transport failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Non-success status from QuickBooks not related to authorization
    #[error("QuickBooks API error: {status} - {target}: {message}")]
    ProviderError {
        status: u16,
        /// Report or query the request was for
        target: String,
        message: String,
    },

    /// Body is not a well-formed document of the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Classify a transport error from reqwest
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else if err.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };

        if err.is_decode() {
            return ApiError::MalformedResponse(format!("{}: {}", context, err));
        }

        ApiError::NetworkError(format!("{}: {} (kind: {})", context, err, kind))
    }

    /// True when the error is an authorization failure
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::AuthError(_))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::AuthError(msg) => (
                StatusCode::UNAUTHORIZED,
                "auth_error",
                format!("Unauthorized: QBO token invalid or expired ({})", msg),
            ),
            ApiError::ProviderError {
                status,
                target,
                message,
            } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (
                    status_code,
                    "provider_error",
                    format!("QuickBooks API error ({}): {}", target, message),
                )
            }
            ApiError::NetworkError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "network_error", msg)
            }
            ApiError::MalformedResponse(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "malformed_response", msg)
            }
            ApiError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ApiError>;
