//! The SDK context object: session lifecycle, credentials, event tracking.
//!
//! [`BeaconClient`] replaces the process-wide singleton of classic analytics
//! SDKs: hosts construct one (or several, isolated) and hand references to
//! whatever needs it. It owns the session state machine
//! (`anonymous → authenticated → anonymous`), the api-client rebuild on
//! credential rotation, and the one-shot token refresh timer.

use crate::error::{BeaconError, Result};
use crate::events::{EventBus, SdkEvent, SubscriptionId};
use crate::network::{NativeNetwork, Network};
use crate::preferences::Preferences;
use crate::push::{PushBridge, WebPush};
use crate::storage::{MemoryStorage, Storage, AUTHENTICATED_ID_KEY, DEVICE_ID_KEY};
use crate::transport::ApiClient;
use crate::types::ApiResponse;
use crate::user::User;
use crate::utils::{epoch_ms, jwt_expired, jwt_expiry_ms, new_insert_id};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

const DEFAULT_HOST: &str = "https://collector.beacon-hq.dev";
const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Refresh timer fires this long before the token's `exp` claim.
const REFRESH_BEFORE: Duration = Duration::from_secs(30);

/// Host-supplied callback that exchanges an expiring token for a fresh one.
pub type RefreshTokenCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Construction options for [`BeaconClient`].
#[derive(Default)]
pub struct ClientOptions {
    pub host: Option<String>,
    pub vapid_key: Option<String>,
    pub debounce_window: Option<Duration>,
    pub network: Option<Arc<dyn Network>>,
    pub storage: Option<Arc<dyn Storage>>,
    pub push_bridge: Option<Arc<dyn PushBridge>>,
}

impl ClientOptions {
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_vapid_key(mut self, vapid_key: impl Into<String>) -> Self {
        self.vapid_key = Some(vapid_key.into());
        self
    }

    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = Some(window);
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_push_bridge(mut self, bridge: Arc<dyn PushBridge>) -> Self {
        self.push_bridge = Some(bridge);
        self
    }
}

/// Options for [`BeaconClient::identify`].
#[derive(Clone, Default)]
pub struct IdentifyOptions {
    pub refresh_user_token: Option<RefreshTokenCallback>,
}

/// Options for [`BeaconClient::reset`].
#[derive(Clone, Copy, Debug)]
pub struct ResetOptions {
    /// Remove the push-subscription user channel before clearing the session.
    pub unsubscribe_push: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        ResetOptions {
            unsubscribe_push: true,
        }
    }
}

/// Resolved configuration shared across components.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub public_api_key: String,
    pub vapid_key: String,
    pub debounce_window: Duration,
}

#[derive(Clone, Debug)]
pub(crate) struct Session {
    pub(crate) distinct_id: String,
    pub(crate) user_token: Option<String>,
}

/// State shared by the client and its subordinate components.
pub(crate) struct ClientCore {
    pub(crate) config: ClientConfig,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) bus: EventBus,
    env_properties: Map<String, Value>,
    session: Mutex<Option<Session>>,
    api: Mutex<Option<Arc<ApiClient>>>,
    refresh_callback: Mutex<Option<RefreshTokenCallback>>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    /// Handle back to ourselves for spawned timers; weak so an armed timer
    /// never keeps a dropped client alive.
    weak_self: Weak<ClientCore>,
}

impl ClientCore {
    fn new(
        config: ClientConfig,
        network: Arc<dyn Network>,
        storage: Arc<dyn Storage>,
    ) -> Arc<Self> {
        let env_properties = Self::build_env_properties(storage.as_ref());
        Arc::new_cyclic(|weak| ClientCore {
            config,
            network,
            storage,
            bus: EventBus::new(),
            env_properties,
            session: Mutex::new(None),
            api: Mutex::new(None),
            refresh_callback: Mutex::new(None),
            refresh_timer: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    fn build_env_properties(storage: &dyn Storage) -> Map<String, Value> {
        let device_id = match storage.get(DEVICE_ID_KEY) {
            Some(id) => id,
            None => {
                let id = new_insert_id();
                storage.set(DEVICE_ID_KEY, &id);
                id
            }
        };

        let mut properties = Map::new();
        properties.insert("$os".into(), Value::String(std::env::consts::OS.into()));
        properties.insert("$sdk_type".into(), Value::String("rust".into()));
        properties.insert(
            "$sdk_version".into(),
            Value::String(env!("CARGO_PKG_VERSION").into()),
        );
        properties.insert("$device_id".into(), Value::String(device_id));
        properties
    }

    pub(crate) fn device_id(&self) -> String {
        match self.storage.get(DEVICE_ID_KEY) {
            Some(id) => id,
            None => {
                let id = new_insert_id();
                self.storage.set(DEVICE_ID_KEY, &id);
                id
            }
        }
    }

    pub(crate) fn distinct_id(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.distinct_id.clone())
    }

    fn rebuild_api(&self) {
        let session = self.session.lock().clone();
        let mut api = self.api.lock();
        *api = session.map(|s| {
            Arc::new(ApiClient::new(
                &self.config.host,
                &self.config.public_api_key,
                s.distinct_id,
                s.user_token,
                self.network.clone(),
            ))
        });
    }

    /// Rotate the session token in place: update credentials, rebuild the
    /// api client, reschedule the refresh timer.
    fn apply_token(&self, token: String) {
        {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(s) => s.user_token = Some(token),
                None => return,
            }
        }
        self.rebuild_api();
        let callback = self.refresh_callback.lock().clone();
        if let Some(callback) = callback {
            self.schedule_refresh(callback);
        }
    }

    /// Arm the one-shot refresh timer for the current token.
    ///
    /// Cancel-and-replace: at most one timer is armed per client, so a new
    /// `identify` supersedes any earlier schedule.
    fn schedule_refresh(&self, callback: RefreshTokenCallback) {
        *self.refresh_callback.lock() = Some(callback.clone());

        let token = match self.session.lock().as_ref().and_then(|s| s.user_token.clone()) {
            Some(token) => token,
            None => return,
        };
        let expires_on = match jwt_expiry_ms(&token) {
            Some(ms) => ms,
            None => return,
        };
        let now = epoch_ms();
        if expires_on <= now {
            return;
        }
        let delay =
            Duration::from_millis((expires_on - now).saturating_sub(REFRESH_BEFORE.as_millis() as u64));

        let core = self.weak_self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(core) = core.upgrade() else { return };
            let Some(old_token) = core
                .session
                .lock()
                .as_ref()
                .and_then(|s| s.user_token.clone())
            else {
                return;
            };

            let mut refreshed = callback(old_token.clone()).await;
            if refreshed.is_err() {
                refreshed = callback(old_token).await;
            }
            match refreshed {
                Ok(new_token) if !new_token.is_empty() => core.apply_token(new_token),
                Ok(_) => warn!("token refresh returned an empty token"),
                Err(e) => warn!(error = %e, "couldn't fetch new user token"),
            }
        });

        let mut timer = self.refresh_timer.lock();
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    fn cancel_refresh(&self) {
        if let Some(handle) = self.refresh_timer.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn clear_session(&self) {
        *self.session.lock() = None;
        *self.api.lock() = None;
        *self.refresh_callback.lock() = None;
        self.cancel_refresh();
        self.storage.remove(AUTHENTICATED_ID_KEY);
    }

    /// Lazy pre-dispatch refresh: if a callback is configured and the held
    /// token has expired, swap in a fresh token first. Failures are logged
    /// and the request proceeds with the stale token.
    async fn maybe_refresh_expired_token(&self) {
        let callback = match self.refresh_callback.lock().clone() {
            Some(callback) => callback,
            None => return,
        };
        let token = match self.session.lock().as_ref().and_then(|s| s.user_token.clone()) {
            Some(token) => token,
            None => return,
        };
        if !jwt_expired(&token, epoch_ms()) {
            return;
        }
        match callback(token).await {
            Ok(new_token) if !new_token.is_empty() => self.apply_token(new_token),
            Ok(_) => warn!("token refresh returned an empty token"),
            Err(e) => warn!(error = %e, "token refresh failed, proceeding with stale token"),
        }
    }

    /// The request funnel every component dispatches through.
    pub(crate) async fn request(
        &self,
        method: &str,
        path: &str,
        payload: Option<&Value>,
    ) -> ApiResponse {
        self.maybe_refresh_expired_token().await;

        let api = self.api.lock().clone();
        match api {
            Some(api) => api.request(method, path, payload).await,
            None => ApiResponse::validation_error("user is not authenticated"),
        }
    }

    /// Envelope funnel for tracking and user-property events.
    pub(crate) async fn event_api(&self, payload: Value) -> ApiResponse {
        self.request("post", "v2/event", Some(&payload)).await
    }

    /// Build the uniform event envelope: idempotency id, timestamp, distinct
    /// id, then the event-specific fields on top.
    pub(crate) fn event_envelope(&self, fields: Map<String, Value>) -> Value {
        let mut envelope = Map::new();
        envelope.insert("$insert_id".into(), Value::String(new_insert_id()));
        envelope.insert("$time".into(), json!(epoch_ms()));
        if let Some(distinct_id) = self.distinct_id() {
            envelope.insert("distinct_id".into(), Value::String(distinct_id));
        }
        envelope.extend(fields);
        Value::Object(envelope)
    }

    pub(crate) fn env_properties(&self) -> &Map<String, Value> {
        &self.env_properties
    }
}

enum IdentifyPlan {
    Conflict,
    RotateToken,
    Noop,
    FirstTime,
}

/// The SDK entry point.
pub struct BeaconClient {
    core: Arc<ClientCore>,
    user: User,
    preferences: Preferences,
    webpush: WebPush,
}

impl BeaconClient {
    /// Construct a client. The only hard failure in the API: an empty
    /// `public_api_key` is a configuration bug, not a runtime condition.
    pub fn new(public_api_key: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let public_api_key = public_api_key.into();
        if public_api_key.is_empty() {
            return Err(BeaconError::MissingApiKey);
        }

        let config = ClientConfig {
            host: options.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            public_api_key,
            vapid_key: options.vapid_key.unwrap_or_default(),
            debounce_window: options.debounce_window.unwrap_or(DEFAULT_DEBOUNCE_WINDOW),
        };
        let network: Arc<dyn Network> = options
            .network
            .unwrap_or_else(|| Arc::new(NativeNetwork::new()));
        let storage: Arc<dyn Storage> = options
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let core = ClientCore::new(config, network, storage);
        let user = User::new(core.clone());
        let preferences = Preferences::new(core.clone());
        let webpush = WebPush::new(core.clone(), options.push_bridge);

        Ok(BeaconClient {
            core,
            user,
            preferences,
            webpush,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn webpush(&self) -> &WebPush {
        &self.webpush
    }

    /// Register an observer for preference lifecycle events.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        self.core.bus.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.core.bus.unsubscribe(id);
    }

    pub fn distinct_id(&self) -> Option<String> {
        self.core.distinct_id()
    }

    pub fn device_id(&self) -> String {
        self.core.device_id()
    }

    /// True iff a session is active (and, with `check_user_token`, holds a
    /// token).
    pub fn is_identified(&self, check_user_token: bool) -> bool {
        match self.core.session.lock().as_ref() {
            Some(session) => !check_user_token || session.user_token.is_some(),
            None => false,
        }
    }

    /// Authenticate `distinct_id` for this client.
    ///
    /// Identity transitions follow the session state machine: a conflicting
    /// id fails until [`reset`](Self::reset); re-identifying the active id
    /// rotates the token or no-ops; a first identify sends the `$identify`
    /// event unless the local marker says this user already authenticated
    /// here.
    pub async fn identify(
        &self,
        distinct_id: impl Into<String>,
        user_token: Option<String>,
        options: IdentifyOptions,
    ) -> ApiResponse {
        let distinct_id = distinct_id.into();
        if distinct_id.is_empty() {
            return ApiResponse::validation_error("distinct_id is missing");
        }

        let plan = {
            let mut session = self.core.session.lock();
            match session.as_mut() {
                Some(s) if s.distinct_id != distinct_id => IdentifyPlan::Conflict,
                Some(s) if s.user_token != user_token => {
                    s.user_token = user_token.clone();
                    IdentifyPlan::RotateToken
                }
                Some(_) => IdentifyPlan::Noop,
                None => {
                    *session = Some(Session {
                        distinct_id: distinct_id.clone(),
                        user_token: user_token.clone(),
                    });
                    IdentifyPlan::FirstTime
                }
            }
        };

        match plan {
            IdentifyPlan::Conflict => ApiResponse::validation_error(
                "user already logged in, reset current user to login new user",
            ),
            IdentifyPlan::RotateToken => {
                self.core.rebuild_api();
                // the rotated token gets a fresh timer; a pending one for the
                // old token must never fire
                let callback = options
                    .refresh_user_token
                    .or_else(|| self.core.refresh_callback.lock().clone());
                self.core.cancel_refresh();
                if let Some(callback) = callback {
                    self.core.schedule_refresh(callback);
                }
                ApiResponse::success()
            }
            IdentifyPlan::Noop => ApiResponse::success(),
            IdentifyPlan::FirstTime => {
                self.core.rebuild_api();
                if let Some(callback) = options.refresh_user_token {
                    self.core.schedule_refresh(callback);
                }

                let already_authenticated = self
                    .core
                    .storage
                    .get(AUTHENTICATED_ID_KEY)
                    .is_some_and(|marker| marker == distinct_id);
                if already_authenticated {
                    self.webpush.update_push_subscription().await;
                    return ApiResponse::success();
                }

                let mut fields = Map::new();
                fields.insert("event".into(), Value::String("$identify".into()));
                fields.insert(
                    "properties".into(),
                    json!({ "$identified_id": distinct_id }),
                );
                let envelope = self.core.event_envelope(fields);
                let resp = self.core.event_api(envelope).await;

                if resp.is_success() {
                    self.core.storage.set(AUTHENTICATED_ID_KEY, &distinct_id);
                    self.webpush.update_push_subscription().await;
                } else {
                    // Tear back down so the caller can retry identify; the
                    // push subscription is left alone.
                    self.reset(ResetOptions {
                        unsubscribe_push: false,
                    })
                    .await;
                }
                resp
            }
        }
    }

    /// Emit a tracked event with the enforced envelope fields.
    pub async fn track(&self, event: impl Into<String>, properties: Option<Value>) -> ApiResponse {
        let event = event.into();
        if event.is_empty() {
            return ApiResponse::validation_error("event name is missing");
        }

        let mut merged = self.core.env_properties().clone();
        if let Some(Value::Object(caller)) = properties {
            // caller wins on key collision
            merged.extend(caller);
        }

        let mut fields = Map::new();
        fields.insert("event".into(), Value::String(event));
        fields.insert("properties".into(), Value::Object(merged));
        let envelope = self.core.event_envelope(fields);
        self.core.event_api(envelope).await
    }

    /// Destroy the session: cancel timers, drop pending preference updates,
    /// clear the mirror and local markers. By default the push-subscription
    /// user channel is removed first.
    pub async fn reset(&self, options: ResetOptions) -> ApiResponse {
        if options.unsubscribe_push {
            self.webpush.remove_push_subscription().await;
        }

        self.preferences.clear();
        self.core.clear_session();
        ApiResponse::success()
    }
}
