//! Stable error codes and the HTTP response envelope
//!
//! Internal error kinds never leak stack traces to callers; HTTP surfaces
//! translate them into `{code, message, details}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client-visible error codes, stable across releases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    ValidationError,
    RateLimitExceeded,
    PayloadTooLarge,
    NotFound,
    InternalError,
    NoModelAvailable,
}

impl ApiErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::RateLimitExceeded => 429,
            Self::PayloadTooLarge => 413,
            Self::NotFound => 404,
            Self::InternalError => 500,
            Self::NoModelAvailable => 503,
        }
    }
}

/// Structured error body
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InternalError, message)
    }
}

/// Uniform `{success, data, meta}` / `{success, error}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    pub fn ok_with_meta(data: T, meta: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(meta),
        }
    }

    pub fn err(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming() {
        let err = ApiError::validation("missing field: severity");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "VALIDATION_ERROR");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiErrorCode::ValidationError.http_status(), 400);
        assert_eq!(ApiErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ApiErrorCode::PayloadTooLarge.http_status(), 413);
        assert_eq!(ApiErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn envelope_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"alert_id": "ALT-1"}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
    }
}
