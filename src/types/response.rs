//! The uniform result envelope returned by every public SDK operation.

use crate::error::ErrorType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome tag of an [`ApiResponse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Error details attached to failed envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
}

/// Uniform result envelope.
///
/// Public operations never return a Rust error for runtime failures; they
/// return this envelope with `status`, an optional HTTP `status_code`, the
/// parsed response `body`, and error details when `status` is `Error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

impl ApiResponse {
    pub fn success() -> Self {
        ApiResponse {
            status: ResponseStatus::Success,
            status_code: None,
            body: None,
            error: None,
        }
    }

    pub fn success_with_body(body: impl Into<Value>) -> Self {
        ApiResponse {
            status: ResponseStatus::Success,
            status_code: None,
            body: Some(body.into()),
            error: None,
        }
    }

    pub fn error(error_type: ErrorType, message: impl Into<String>) -> Self {
        ApiResponse {
            status: ResponseStatus::Error,
            status_code: None,
            body: None,
            error: Some(ApiErrorBody {
                error_type,
                message: message.into(),
            }),
        }
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::error(ErrorType::ValidationError, message)
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::error(ErrorType::NetworkError, message).with_status_code(500)
    }

    #[must_use]
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// Error category, if this envelope carries one.
    pub fn error_type(&self) -> Option<ErrorType> {
        self.error.as_ref().map(|e| e.error_type)
    }
}
