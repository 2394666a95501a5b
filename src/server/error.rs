//! HTTP error bodies and status mapping.

use crate::error::Error;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Error category reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    /// Malformed request.
    InvalidRequest,
    /// Unknown detector.
    DetectorNotFound,
    /// Detector configuration is invalid.
    InvalidDetectorConfig,
    /// The node cannot answer right now; retry against the cloud.
    ServiceUnavailable,
    /// Unexpected failure.
    ServerError,
}

/// Error body: `{"error": {"type": .., "message": ..}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error detail.
    pub error: ApiErrorDetail,
}

/// Error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    /// Error category.
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    /// Human-readable description.
    pub message: String,
}

/// Error with the status it is served under.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Body.
    pub response: ApiErrorResponse,
}

impl ApiError {
    /// Build an error.
    pub fn new(status: StatusCode, error_type: ApiErrorType, message: impl Into<String>) -> Self {
        Self {
            status,
            response: ApiErrorResponse {
                error: ApiErrorDetail {
                    error_type,
                    message: message.into(),
                },
            },
        }
    }

    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ApiErrorType::InvalidRequest, message)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let (status, error_type) = match &e {
            Error::DetectorNotFound { .. } => (StatusCode::NOT_FOUND, ApiErrorType::DetectorNotFound),
            Error::ConfigInvalid { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorType::InvalidDetectorConfig,
            ),
            Error::ModelUnavailable { .. }
            | Error::ServiceUnavailable { .. }
            | Error::InferenceExecution { .. }
            | Error::CloudUnreachable { .. }
            | Error::QueueFull { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorType::ServiceUnavailable,
            ),
            Error::InvalidImage { .. } => (StatusCode::BAD_REQUEST, ApiErrorType::InvalidRequest),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorType::ServerError),
        };

        let message = match std::error::Error::source(&e) {
            Some(source) => format!("{e}: {source}"),
            None => e.to_string(),
        };
        Self::new(status, error_type, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::CloudError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                Error::DetectorNotFound {
                    detector_id: "d".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                Error::ConfigInvalid {
                    detector_id: "d".into(),
                    reason: "r".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                Error::ModelUnavailable {
                    detector_id: "d".into(),
                    reason: "r".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::QueueFull { capacity: 1 }, StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::CloudUnreachable {
                    source: CloudError::Timeout { attempts: 1 },
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::InvalidImage { reason: "r".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Internal {
                    message: "m".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let fallback = error.is_gateway_fallback();
            let api = ApiError::from(error);
            assert_eq!(api.status, status);
            assert_eq!(
                fallback,
                matches!(
                    status,
                    StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::SERVICE_UNAVAILABLE
                )
            );
        }
    }

    #[test]
    fn test_cloud_error_detail_in_message() {
        let api = ApiError::from(Error::CloudUnreachable {
            source: CloudError::Server { status: 502 },
        });
        assert!(api.response.error.message.contains("502"));
    }
}
