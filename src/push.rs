//! Web-push subscription coordinator.
//!
//! The browser (or any push-capable host) side lives behind [`PushBridge`];
//! the SDK only orchestrates: permission, existing-subscription lookup,
//! subscribe, then forwarding the subscription object into the user-channel
//! pipeline. Hosts without push support simply provide no bridge.

use crate::client::ClientCore;
use crate::error::{ErrorType, Result};
use crate::types::ApiResponse;
use crate::user::User;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Host notification-permission state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPermission {
    Granted,
    Denied,
    /// Not yet asked.
    Default,
}

/// Host-side push plumbing: service-worker registration, permission prompts,
/// and the push manager subscription object (serialized as JSON).
#[async_trait]
pub trait PushBridge: Send + Sync + 'static {
    /// Whether the host environment supports push at all.
    fn is_supported(&self) -> bool;

    /// Current permission state, without prompting.
    fn permission(&self) -> PushPermission;

    /// Prompt the user for notification permission.
    async fn request_permission(&self) -> Result<PushPermission>;

    /// The existing subscription, if one is active.
    async fn get_subscription(&self) -> Result<Option<Value>>;

    /// Create a new subscription against the given VAPID key.
    async fn subscribe(&self, vapid_key: &str) -> Result<Value>;
}

pub struct WebPush {
    core: Arc<ClientCore>,
    user: User,
    bridge: Option<Arc<dyn PushBridge>>,
}

impl WebPush {
    pub(crate) fn new(core: Arc<ClientCore>, bridge: Option<Arc<dyn PushBridge>>) -> Self {
        let user = User::new(core.clone());
        WebPush { core, user, bridge }
    }

    /// Current permission state, if a bridge is attached.
    pub fn notification_permission(&self) -> Option<PushPermission> {
        self.bridge.as_ref().map(|bridge| bridge.permission())
    }

    /// Register for push: prompt for permission, subscribe, and attach the
    /// subscription as a user channel.
    pub async fn register_push(&self) -> ApiResponse {
        let Some(bridge) = self.bridge.as_ref().filter(|b| b.is_supported()) else {
            return ApiResponse::error(
                ErrorType::UnsupportedAction,
                "webpush isn't supported in this environment",
            );
        };

        let permission = match bridge.request_permission().await {
            Ok(permission) => permission,
            Err(e) => return ApiResponse::error(ErrorType::UnknownError, e.to_string()),
        };
        if permission != PushPermission::Granted {
            return ApiResponse::error(
                ErrorType::PermissionDenied,
                "notification permission isn't granted",
            );
        }

        match bridge.get_subscription().await {
            // an active subscription already reached the collector
            Ok(Some(_)) => return ApiResponse::success(),
            Ok(None) => {}
            Err(e) => return ApiResponse::error(ErrorType::UnknownError, e.to_string()),
        }

        if self.core.config.vapid_key.is_empty() {
            return ApiResponse::validation_error(
                "vapid key is missing, provide it while constructing the client",
            );
        }

        match bridge.subscribe(&self.core.config.vapid_key).await {
            Ok(subscription) => self.user.add_webpush(subscription).await,
            Err(e) => {
                warn!(error = %e, "push subscribe failed");
                ApiResponse::error(ErrorType::UnknownError, e.to_string())
            }
        }
    }

    /// Re-attach the existing subscription (if any) as a user channel,
    /// without prompting.
    pub async fn update_push_subscription(&self) -> ApiResponse {
        match self.read_subscription().await {
            Ok(Some(subscription)) => self.user.add_webpush(subscription).await,
            Ok(None) => ApiResponse::success(),
            Err(resp) => resp,
        }
    }

    /// Detach the existing subscription (if any) from the user's channels,
    /// without prompting.
    pub async fn remove_push_subscription(&self) -> ApiResponse {
        match self.read_subscription().await {
            Ok(Some(subscription)) => self.user.remove_webpush(subscription).await,
            Ok(None) => ApiResponse::success(),
            Err(resp) => resp,
        }
    }

    async fn read_subscription(&self) -> std::result::Result<Option<Value>, ApiResponse> {
        let Some(bridge) = self.bridge.as_ref().filter(|b| b.is_supported()) else {
            return Ok(None);
        };
        bridge
            .get_subscription()
            .await
            .map_err(|e| ApiResponse::error(ErrorType::UnknownError, e.to_string()))
    }
}
