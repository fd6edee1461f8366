//! Push display context: payload sanitizing and delivery reporting.
//!
//! This runs where notifications are shown (a service worker, a desktop
//! notifier), isolated from the main client: it never sees the preference
//! tree and authenticates with the workspace key alone. Incoming payloads
//! are untrusted wire data, so display fields go through an allow-list,
//! bare asset paths are rewritten onto the CDN, and a malformed action list
//! is dropped rather than displayed.

use crate::network::{HttpRequest, Network};
use crate::utils::epoch_ms;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Notification fields allowed through to the host display API.
const ALLOWED_NOTIFICATION_FIELDS: [&str; 15] = [
    "title",
    "body",
    "icon",
    "image",
    "badge",
    "vibrate",
    "sound",
    "dir",
    "tag",
    "data",
    "requireInteraction",
    "renotify",
    "silent",
    "timestamp",
    "actions",
];

/// Fields whose bare paths are rewritten onto the CDN.
const NOTIFICATION_URL_FIELDS: [&str; 3] = ["image", "icon", "badge"];

/// Configuration of the display-context reporter.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub host: String,
    pub cdn_url: String,
    pub workspace_key: String,
}

impl WorkerConfig {
    pub fn new(workspace_key: impl Into<String>) -> Self {
        WorkerConfig {
            host: "https://hub.beacon-hq.dev".to_string(),
            cdn_url: "https://cdn.beacon-hq.dev/".to_string(),
            workspace_key: workspace_key.into(),
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_cdn_url(mut self, cdn_url: impl Into<String>) -> Self {
        self.cdn_url = cdn_url.into();
        self
    }
}

/// Filter a raw push payload down to displayable fields.
///
/// Unknown fields are discarded, bare `image`/`icon`/`badge` paths get the
/// CDN prefix, and a non-array `actions` value is dropped entirely.
pub fn sanitize_notification(raw: &Value, cdn_url: &str) -> Map<String, Value> {
    let mut sanitized = Map::new();
    let Some(raw) = raw.as_object() else {
        return sanitized;
    };

    for (key, value) in raw {
        if !ALLOWED_NOTIFICATION_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if NOTIFICATION_URL_FIELDS.contains(&key.as_str()) {
            if let Some(path) = value.as_str() {
                if !path.is_empty() && !path.starts_with("http") {
                    sanitized.insert(key.clone(), Value::String(format!("{cdn_url}{path}")));
                    continue;
                }
            }
        }
        sanitized.insert(key.clone(), value.clone());
    }

    if let Some(actions) = sanitized.get("actions") {
        if !actions.is_array() {
            sanitized.remove("actions");
        }
    }
    sanitized
}

/// Resolve the redirect for a notification click.
///
/// Looks up the clicked action id in the payload's `launch_urls` map,
/// falling back to its `default` entry, then to `/`.
pub fn resolve_click_url(notification_data: &Value, action: Option<&str>) -> String {
    let launch_urls = notification_data.get("launch_urls").and_then(Value::as_object);
    let Some(launch_urls) = launch_urls else {
        return "/".to_string();
    };

    if let Some(action) = action.filter(|a| !a.is_empty()) {
        if let Some(url) = launch_urls.get(action).and_then(Value::as_str) {
            return url.to_string();
        }
    }
    launch_urls
        .get("default")
        .and_then(Value::as_str)
        .unwrap_or("/")
        .to_string()
}

fn notification_id(notification: &Value) -> Value {
    notification
        .pointer("/data/notification_id")
        .cloned()
        .unwrap_or(Value::Null)
}

/// Reports delivery lifecycle events with the workspace key.
pub struct PushReporter {
    config: WorkerConfig,
    network: Arc<dyn Network>,
}

impl PushReporter {
    pub fn new(config: WorkerConfig, network: Arc<dyn Network>) -> Self {
        PushReporter { config, network }
    }

    async fn report(&self, event: &str, properties: Value) {
        let payload = json!({
            "event": event,
            "$time": epoch_ms(),
            "properties": properties,
        });
        let request = HttpRequest::new("post", format!("{}/v2/event", self.config.host))
            .with_header("Content-Type", "application/json")
            .with_header("Authorization", &self.config.workspace_key)
            .with_json_body(&payload);

        // fire-and-forget: a lost delivery receipt never blocks display
        if let Err(e) = self.network.fetch(request).await {
            warn!(event, error = %e, "delivery report failed");
        }
    }

    /// Sanitize an incoming push payload and report its delivery. Returns
    /// the displayable notification fields.
    pub async fn handle_push(&self, payload: &Value) -> Map<String, Value> {
        let sanitized = sanitize_notification(payload, &self.config.cdn_url);
        let id = notification_id(&Value::Object(sanitized.clone()));
        self.report("$notification_delivered", json!({ "id": id }))
            .await;
        sanitized
    }

    /// Report a click and resolve where it should navigate.
    pub async fn handle_click(&self, notification: &Value, action: Option<&str>) -> String {
        self.report(
            "$notification_clicked",
            json!({
                "id": notification_id(notification),
                "label_id": action,
            }),
        )
        .await;

        let data = notification.get("data").cloned().unwrap_or(Value::Null);
        resolve_click_url(&data, action)
    }

    /// Report a dismissal.
    pub async fn handle_dismiss(&self, notification: &Value) {
        self.report(
            "$notification_dismiss",
            json!({ "id": notification_id(notification) }),
        )
        .await;
    }
}
