//! Error types for Beacon SDK operations.
//!
//! Failures split into two layers. [`BeaconError`] is the hard-failure enum:
//! construction-time misuse and transport internals that never reach SDK
//! callers directly. Everything user-facing is reported through the
//! [`ApiResponse`](crate::types::ApiResponse) envelope carrying an
//! [`ErrorType`] tag, so a UI can branch on the category without string
//! matching.
//!
//! # Error Categories
//!
//! | Category | Meaning | Dispatched remotely |
//! |----------|---------|---------------------|
//! | `VALIDATION_ERROR` | bad/missing input, illegal state transition, non-editable mutation | No |
//! | `NETWORK_ERROR` | transport or response-parse failure | Yes (failed) |
//! | `UNKNOWN_ERROR` | unexpected failure during push registration | Depends |
//! | `PERMISSION_DENIED` | notification permission refused | No |
//! | `UNSUPPORTED_ACTION` | push not supported by the host bridge | No |
//!
//! Validation errors are detected synchronously and returned without any
//! network attempt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for fallible internal operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Hard failures: configuration misuse and transport internals.
///
/// The only variant that escapes to SDK callers is [`BeaconError::MissingApiKey`],
/// raised by [`BeaconClient::new`](crate::client::BeaconClient::new). The rest
/// are folded into `NETWORK_ERROR` envelopes by the transport layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BeaconError {
    /// The client was constructed without a public api key.
    #[error("public api key is missing")]
    MissingApiKey,

    /// HTTP request failed before a response could be read.
    #[error("http error: {0}")]
    Http(String),

    /// Response body could not be parsed as JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The host-supplied token refresh callback failed.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// The host push bridge failed while subscribing or reading state.
    #[error("push bridge error: {0}")]
    PushBridge(String),
}

/// Category tag carried inside error envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ValidationError,
    NetworkError,
    UnknownError,
    PermissionDenied,
    UnsupportedAction,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ValidationError => "VALIDATION_ERROR",
            ErrorType::NetworkError => "NETWORK_ERROR",
            ErrorType::UnknownError => "UNKNOWN_ERROR",
            ErrorType::PermissionDenied => "PERMISSION_DENIED",
            ErrorType::UnsupportedAction => "UNSUPPORTED_ACTION",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
