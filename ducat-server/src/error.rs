//! API error handling module
//!
//! Maps protocol errors onto HTTP status codes and renders every failure as
//! a TAXII error resource (`title`, `description`, `http_status`).

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use ducat_core::{TaxiiError, TAXII_MEDIA_TYPE};

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - malformed query string or request body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not acceptable - the Accept header does not allow TAXII 2.1
    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    /// Unsupported media type - request body is not TAXII JSON
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Protocol error from the TAXII library
    #[error(transparent)]
    Taxii(#[from] TaxiiError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a not acceptable error
    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::NotAcceptable(message.into())
    }

    /// Create an unsupported media type error
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Taxii(TaxiiError::not_found(message))
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Taxii(ref e) => match e {
                // Malformed filter parameters → 400
                TaxiiError::InvalidFilter(_) => StatusCode::BAD_REQUEST,

                // Permission refusals and absent resources
                TaxiiError::Forbidden(_) => StatusCode::FORBIDDEN,
                TaxiiError::NotFound(_) => StatusCode::NOT_FOUND,

                // Backend capability gaps → 405
                TaxiiError::Unsupported(_) => StatusCode::METHOD_NOT_ALLOWED,

                // Content the server understood but cannot process → 422
                TaxiiError::Validation(_) | TaxiiError::Processing(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }

                // Storage failures → 503
                TaxiiError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Title field of the TAXII error resource
    fn title(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "Invalid Request",
            Self::Unauthorized(_) => "Unauthorized",
            Self::NotAcceptable(_) => "Not Acceptable",
            Self::UnsupportedMediaType(_) => "Unsupported Media Type",
            Self::Internal(_) => "Internal Error",
            Self::Taxii(ref e) => match e {
                TaxiiError::InvalidFilter(_) => "Invalid Filter",
                TaxiiError::Forbidden(_) => "Forbidden",
                TaxiiError::NotFound(_) => "Not Found",
                TaxiiError::Unsupported(_) => "Unsupported Operation",
                TaxiiError::Validation(_) => "Validation Error",
                TaxiiError::Processing(_) => "Processing Error",
                TaxiiError::BackendUnavailable(_) => "Backend Unavailable",
            },
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotAcceptable(_) => "not_acceptable",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Internal(_) => "internal",
            Self::Taxii(_) => "taxii",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let title = self.title();
        let message = self.to_string();

        // Log based on severity, always including internal details
        match &self {
            Self::Unauthorized(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    error = %message,
                    "Authentication error"
                );
            }
            Self::Internal(_) => {
                tracing::error!(
                    status = %status,
                    category = category,
                    error = %message,
                    "Server error"
                );
            }
            Self::Taxii(TaxiiError::BackendUnavailable(_)) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    error = %message,
                    "Backend unavailable"
                );
            }
            _ => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    error = %message,
                    "Client error"
                );
            }
        }

        let body = serde_json::json!({
            "title": title,
            "description": message,
            "http_status": status.as_u16().to_string(),
        });

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(TAXII_MEDIA_TYPE),
        );
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"ducat\""),
            );
        }
        response
    }
}
