//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_core::RollcallError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - Operation cannot be completed due to current state.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional structured context (e.g. who owns a device).
        details: Option<serde_json::Value>,
    },

    /// 422 Unprocessable Entity - Well-formed request that cannot be acted on.
    UnprocessableEntity {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 503 Service Unavailable - Discovery hardware is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "duplicate_device",
    "message": "Device 'AA:BB:CC:DD:EE:01' is already registered to Asha Rao",
    "details": { "registered_to": "Asha Rao" }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "duplicate_device").
    #[schema(example = "invalid_name")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid participant name: name cannot be empty")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict {
                error_code,
                message,
                details,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details,
                },
            ),

            Self::UnprocessableEntity { error_code, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                // Log internal errors
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(|d| serde_json::json!(d)),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl ApiError {
    /// 409 for a radio already held by a session or another scan.
    #[must_use]
    pub fn radio_busy() -> Self {
        Self::Conflict {
            error_code: "radio_busy".to_string(),
            message: "The radio is in use by another scan".to_string(),
            details: None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::UnprocessableEntity { message, .. } => {
                write!(f, "Unprocessable Entity: {message}")
            }
            Self::InternalError { message, .. } => {
                write!(f, "Internal Error: {message}")
            }
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from rollcall_core errors.
impl From<RollcallError> for ApiError {
    fn from(err: RollcallError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();

        match &err {
            RollcallError::InvalidName(_) | RollcallError::InvalidDeviceId(_) => {
                Self::BadRequest { error_code, message }
            }
            RollcallError::DuplicateDevice { registered_to, .. } => Self::Conflict {
                error_code,
                message,
                details: Some(serde_json::json!({ "registered_to": registered_to })),
            },
            RollcallError::SessionAlreadyRunning | RollcallError::SessionNotRunning => {
                Self::Conflict {
                    error_code,
                    message,
                    details: None,
                }
            }
            RollcallError::EmptyRegistry => Self::UnprocessableEntity { error_code, message },
            RollcallError::ConfigParseError(_)
            | RollcallError::ConfigValidationError(_)
            | RollcallError::PersistenceError(_)
            | RollcallError::IoError(_) => Self::InternalError {
                error_code,
                message,
                details: None,
            },
            RollcallError::BluetoothAdapterNotFound
            | RollcallError::BluetoothAdapterPoweredOff
            | RollcallError::DiscoveryFailed(_) => Self::ServiceUnavailable {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<rollcall_core::RegistryError> for ApiError {
    fn from(err: rollcall_core::RegistryError) -> Self {
        Self::from(RollcallError::from(err))
    }
}

impl From<rollcall_core::DiscoveryError> for ApiError {
    fn from(err: rollcall_core::DiscoveryError) -> Self {
        Self::from(RollcallError::from(err))
    }
}
