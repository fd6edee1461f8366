//! Credentialed request wrapper over [`Network`].
//!
//! One [`ApiClient`] exists per (distinct id, token) pair; the session
//! manager rebuilds it whenever credentials rotate. Transport and
//! application failures are both folded into the uniform [`ApiResponse`]
//! envelope here, so callers never see a raw error.

use crate::error::ErrorType;
use crate::network::{HttpRequest, Network};
use crate::types::{ApiErrorBody, ApiResponse, ResponseStatus};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct ApiClient {
    host: String,
    public_api_key: String,
    user_token: Option<String>,
    distinct_id: String,
    network: Arc<dyn Network>,
}

impl ApiClient {
    pub fn new(
        host: impl Into<String>,
        public_api_key: impl Into<String>,
        distinct_id: impl Into<String>,
        user_token: Option<String>,
        network: Arc<dyn Network>,
    ) -> Self {
        ApiClient {
            host: host.into(),
            public_api_key: public_api_key.into(),
            user_token,
            distinct_id: distinct_id.into(),
            network,
        }
    }

    pub fn distinct_id(&self) -> &str {
        &self.distinct_id
    }

    pub fn user_token(&self) -> Option<&str> {
        self.user_token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host.trim_end_matches('/'), path)
    }

    fn build(&self, method: &str, path: &str, payload: Option<&Value>) -> HttpRequest {
        let mut request = HttpRequest::new(method, self.url(path))
            .with_header("Content-Type", "application/json")
            .with_header("Authorization", &self.public_api_key);

        if let Some(token) = &self.user_token {
            request = request.with_header("x-ss-signature", token);
        }
        if let Some(payload) = payload {
            request = request.with_json_body(payload);
        }
        request
    }

    /// Dispatch a request and fold the outcome into the response envelope.
    ///
    /// The envelope `status` comes from the response body's own `status`
    /// field when present, falling back to HTTP-ok. Network and parse
    /// failures produce a `NETWORK_ERROR` envelope with a synthetic 500.
    pub async fn request(&self, method: &str, path: &str, payload: Option<&Value>) -> ApiResponse {
        let request = self.build(method, path, payload);
        debug!(method, path, "dispatching collector request");

        let response = match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => return ApiResponse::network_error(e.to_string()),
        };

        let body: Value = match response.body_json() {
            Ok(body) => body,
            Err(e) => return ApiResponse::network_error(e.to_string()),
        };

        let status = match body.get("status").and_then(Value::as_str) {
            Some("success") => ResponseStatus::Success,
            Some(_) => ResponseStatus::Error,
            None if response.is_ok() => ResponseStatus::Success,
            None => ResponseStatus::Error,
        };

        let error = if status == ResponseStatus::Error {
            let error_type = body
                .pointer("/error/type")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_value(Value::String(raw.to_string())).ok())
                .unwrap_or(ErrorType::UnknownError);
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            Some(ApiErrorBody {
                error_type,
                message,
            })
        } else {
            None
        };

        ApiResponse {
            status,
            status_code: Some(response.status),
            body: Some(body),
            error,
        }
    }
}
