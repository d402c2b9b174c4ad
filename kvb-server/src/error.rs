//! # HTTP API Errors
//!
//! Request-level failures and their HTTP mapping. Command-level store errors
//! are not `ApiError`s; they travel inside results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use kvb_client::ClientError;
use kvb_common::BridgeError;

/// Result type for request handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// Missing or wrong token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Body or path could not be turned into commands.
    #[error("{0}")]
    BadRequest(String),

    // ==================
    // Server Errors (5xx)
    // ==================
    /// The store could not be reached or the session broke mid-request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Auth => ApiError::Unauthorized,
            BridgeError::Protocol(message) | BridgeError::Command(message) => {
                ApiError::BadRequest(message)
            }
            BridgeError::Connection(message) => ApiError::Unavailable(message),
            BridgeError::Config(message) => ApiError::Internal(message),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        ApiError::from(BridgeError::from(err))
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::BadRequest("ERR failed to parse command".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_client_errors_map_to_unavailable() {
        let err = ApiError::from(ClientError::Timeout("read"));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("read timed out"));
    }

    #[test]
    fn test_protocol_errors_map_to_bad_request() {
        let err = ApiError::from(BridgeError::Protocol("ERR empty command".to_string()));
        assert_eq!(err, ApiError::BadRequest("ERR empty command".to_string()));
    }
}
