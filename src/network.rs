//! Network abstraction between the SDK and the wire.
//!
//! [`Network`] is the seam tests mock; [`NativeNetwork`] is the reqwest-backed
//! implementation hosts get by default.

use crate::error::{BeaconError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A single JSON request to the collector.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        HttpRequest {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_json_body(mut self, payload: &Value) -> Self {
        self.body = Some(Bytes::from(payload.to_string()));
        self
    }
}

/// Raw response before envelope mapping.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Abstraction for network dispatch.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed [`Network`].
pub struct NativeNetwork {
    client: reqwest::Client,
}

impl NativeNetwork {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for NativeNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Network for NativeNetwork {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method.to_uppercase().as_str() {
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "DELETE" => reqwest::Method::DELETE,
            "PATCH" => reqwest::Method::PATCH,
            _ => reqwest::Method::GET,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BeaconError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| BeaconError::Http(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}
