//! User-property operations.
//!
//! Everything here is sugar over the `$set`/`$append`/`$remove`/`$unset`
//! user-event verbs, funnelled through the shared event envelope so
//! idempotency id, timestamp, and distinct id are applied uniformly. Keys
//! starting with `$` or `ss_` are reserved for the collector and stripped
//! from host-supplied payloads.

use crate::client::ClientCore;
use crate::types::ApiResponse;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

const EMPTY_DATA: &str = "data provided is empty";

fn is_reserved_key(key: &str) -> bool {
    key.starts_with('$') || key.to_lowercase().starts_with("ss_")
}

fn valid_email(email: &str) -> bool {
    if email.is_empty() || email.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// E.164: `+` then 2..=15 digits, no leading zero.
fn valid_e164(mobile: &str) -> bool {
    let Some(rest) = mobile.strip_prefix('+') else {
        return false;
    };
    let bytes = rest.as_bytes();
    (2..=15).contains(&bytes.len())
        && bytes[0] != b'0'
        && bytes.iter().all(|b| b.is_ascii_digit())
}

#[derive(Clone, Copy, PartialEq)]
enum Coerce {
    None,
    Number,
}

pub struct User {
    core: Arc<ClientCore>,
}

impl User {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        User { core }
    }

    fn validate_object(data: Value, allow_reserved: bool, coerce: Coerce) -> Map<String, Value> {
        let Value::Object(data) = data else {
            return Map::new();
        };

        let mut validated = Map::new();
        for (key, value) in data {
            if !allow_reserved && is_reserved_key(&key) {
                warn!(key = %key, "user property key cannot start with $ or ss_");
                continue;
            }

            let value = match coerce {
                Coerce::None => value,
                Coerce::Number => match coerce_number(&value) {
                    Some(v) => v,
                    None => {
                        warn!(key = %key, "user property value is not numeric");
                        continue;
                    }
                },
            };
            validated.insert(key, value);
        }
        validated
    }

    fn validate_array(keys: Vec<String>) -> Vec<String> {
        keys.into_iter()
            .filter(|key| {
                if is_reserved_key(key) {
                    warn!(key = %key, "user property key cannot start with $ or ss_");
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    async fn trigger(&self, verb: &str, data: Value) -> ApiResponse {
        let mut fields = Map::new();
        fields.insert(verb.to_string(), data);
        let envelope = self.core.event_envelope(fields);
        self.core.event_api(envelope).await
    }

    async fn public_op(&self, verb: &str, data: Value, coerce: Coerce) -> ApiResponse {
        let validated = Self::validate_object(data, false, coerce);
        if validated.is_empty() {
            return ApiResponse::validation_error(EMPTY_DATA);
        }
        self.trigger(verb, Value::Object(validated)).await
    }

    async fn internal_op(&self, verb: &str, data: Value) -> ApiResponse {
        let validated = Self::validate_object(data, true, Coerce::None);
        if validated.is_empty() {
            return ApiResponse::validation_error(EMPTY_DATA);
        }
        self.trigger(verb, Value::Object(validated)).await
    }

    /// Set user properties. Reserved keys are removed.
    pub async fn set(&self, data: Value) -> ApiResponse {
        self.public_op("$set", data, Coerce::None).await
    }

    /// Set a single user property.
    pub async fn set_kv(&self, key: impl Into<String>, value: Value) -> ApiResponse {
        let mut data = Map::new();
        data.insert(key.into(), value);
        self.set(Value::Object(data)).await
    }

    /// Set user properties that cannot be changed later.
    pub async fn set_once(&self, data: Value) -> ApiResponse {
        self.public_op("$set_once", data, Coerce::None).await
    }

    /// Increment (or, with negative values, decrement) numeric properties.
    pub async fn increment(&self, data: Value) -> ApiResponse {
        self.public_op("$add", data, Coerce::Number).await
    }

    /// Append items to list-valued properties.
    pub async fn append(&self, data: Value) -> ApiResponse {
        self.public_op("$append", data, Coerce::None).await
    }

    /// Remove items from list-valued properties.
    pub async fn remove(&self, data: Value) -> ApiResponse {
        self.public_op("$remove", data, Coerce::None).await
    }

    /// Remove user properties entirely.
    pub async fn unset(&self, keys: Vec<String>) -> ApiResponse {
        let validated = Self::validate_array(keys);
        if validated.is_empty() {
            return ApiResponse::validation_error(EMPTY_DATA);
        }
        self.trigger("$unset", Value::from(validated)).await
    }

    /// Remove a single user property.
    pub async fn unset_key(&self, key: impl Into<String>) -> ApiResponse {
        self.unset(vec![key.into()]).await
    }

    pub async fn add_email(&self, email: impl AsRef<str>) -> ApiResponse {
        let email = email.as_ref();
        if !valid_email(email) {
            return ApiResponse::validation_error("provided email is invalid");
        }
        self.internal_op("$append", serde_json::json!({ "$email": email }))
            .await
    }

    pub async fn remove_email(&self, email: impl AsRef<str>) -> ApiResponse {
        let email = email.as_ref();
        if !valid_email(email) {
            return ApiResponse::validation_error("provided email is invalid");
        }
        self.internal_op("$remove", serde_json::json!({ "$email": email }))
            .await
    }

    /// Mobile numbers must be in E.164 form (`+14155552671`).
    pub async fn add_sms(&self, mobile: impl AsRef<str>) -> ApiResponse {
        let mobile = mobile.as_ref();
        if !valid_e164(mobile) {
            return ApiResponse::validation_error(
                "provided mobile number is invalid, must be as per E.164 standard",
            );
        }
        self.internal_op("$append", serde_json::json!({ "$sms": mobile }))
            .await
    }

    pub async fn remove_sms(&self, mobile: impl AsRef<str>) -> ApiResponse {
        let mobile = mobile.as_ref();
        if !valid_e164(mobile) {
            return ApiResponse::validation_error(
                "provided mobile number is invalid, must be as per E.164 standard",
            );
        }
        self.internal_op("$remove", serde_json::json!({ "$sms": mobile }))
            .await
    }

    /// Mobile numbers must be in E.164 form (`+14155552671`).
    pub async fn add_whatsapp(&self, mobile: impl AsRef<str>) -> ApiResponse {
        let mobile = mobile.as_ref();
        if !valid_e164(mobile) {
            return ApiResponse::validation_error(
                "provided mobile number is invalid, must be as per E.164 standard",
            );
        }
        self.internal_op("$append", serde_json::json!({ "$whatsapp": mobile }))
            .await
    }

    pub async fn remove_whatsapp(&self, mobile: impl AsRef<str>) -> ApiResponse {
        let mobile = mobile.as_ref();
        if !valid_e164(mobile) {
            return ApiResponse::validation_error(
                "provided mobile number is invalid, must be as per E.164 standard",
            );
        }
        self.internal_op("$remove", serde_json::json!({ "$whatsapp": mobile }))
            .await
    }

    /// Attach a web-push subscription object as a user channel.
    pub async fn add_webpush(&self, subscription: Value) -> ApiResponse {
        if !subscription.is_object() {
            return ApiResponse::validation_error(
                "provided push subscription is invalid, must be an object",
            );
        }
        let device_id = self.core.device_id();
        self.internal_op(
            "$append",
            serde_json::json!({
                "$webpush": subscription,
                "$id_provider": "vapid",
                "$device_id": device_id,
            }),
        )
        .await
    }

    pub async fn remove_webpush(&self, subscription: Value) -> ApiResponse {
        if !subscription.is_object() {
            return ApiResponse::validation_error(
                "provided push subscription is invalid, must be an object",
            );
        }
        let device_id = self.core.device_id();
        self.internal_op(
            "$remove",
            serde_json::json!({
                "$webpush": subscription,
                "$id_provider": "vapid",
                "$device_id": device_id,
            }),
        )
        .await
    }

    /// Two-letter ISO 639-1 code, e.g. `en`, `es`, `fr`.
    pub async fn set_preferred_language(&self, language: impl AsRef<str>) -> ApiResponse {
        self.internal_op(
            "$set",
            serde_json::json!({ "$preferred_language": language.as_ref() }),
        )
        .await
    }

    /// IANA timezone name, e.g. `America/New_York`.
    pub async fn set_timezone(&self, timezone: impl AsRef<str>) -> ApiResponse {
        self.internal_op("$set", serde_json::json!({ "$timezone": timezone.as_ref() }))
            .await
    }
}

fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;

    // ========== Validation Helper Tests ==========

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key("$email"));
        assert!(is_reserved_key("ss_internal"));
        assert!(is_reserved_key("SS_internal"));
        assert!(!is_reserved_key("plan"));
    }

    #[test]
    fn test_email_validation() {
        assert!(valid_email("a@b.co"));
        assert!(valid_email("first.last@sub.example.com"));
        assert!(!valid_email("a@b"));
        assert!(!valid_email("a b@c.d"));
        assert!(!valid_email("@b.co"));
        assert!(!valid_email(""));
    }

    #[test]
    fn test_e164_validation() {
        assert!(valid_e164("+14155552671"));
        assert!(valid_e164("+4915123456789"));
        assert!(!valid_e164("14155552671"));
        assert!(!valid_e164("+0415555267"));
        assert!(!valid_e164("+1"));
        assert!(!valid_e164("+1415555267112345678"));
        assert!(!valid_e164("+1-415-555"));
    }

    #[test]
    fn test_validate_object_strips_reserved() {
        let validated = User::validate_object(
            serde_json::json!({"plan": "pro", "$hidden": 1, "ss_marker": 2}),
            false,
            Coerce::None,
        );
        assert_eq!(validated.len(), 1);
        assert!(validated.contains_key("plan"));
    }

    #[test]
    fn test_validate_object_number_coercion() {
        let validated = User::validate_object(
            serde_json::json!({"count": 3, "rate": "2.5", "bad": "x"}),
            false,
            Coerce::Number,
        );
        assert_eq!(validated.len(), 2);
        assert_eq!(validated["count"], serde_json::json!(3));
        assert_eq!(validated["rate"], serde_json::json!(2.5));
    }

    #[test]
    fn test_validate_object_non_object() {
        assert!(User::validate_object(serde_json::json!("str"), false, Coerce::None).is_empty());
    }

    // ========== Operation Tests (over mock network) ==========

    mod ops {
        use super::*;
        use crate::client::{BeaconClient, ClientOptions, IdentifyOptions};
        use crate::error::Result;
        use crate::network::{HttpRequest, HttpResponse, Network};
        use async_trait::async_trait;
        use parking_lot::Mutex;
        use serde_json::json;

        struct RecordingNetwork {
            requests: Mutex<Vec<HttpRequest>>,
        }

        #[async_trait]
        impl Network for RecordingNetwork {
            async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
                self.requests.lock().push(request);
                Ok(HttpResponse::new(200, r#"{"status":"success"}"#))
            }
        }

        async fn identified_client() -> (BeaconClient, Arc<RecordingNetwork>) {
            let network = Arc::new(RecordingNetwork {
                requests: Mutex::new(Vec::new()),
            });
            let client = BeaconClient::new(
                "pk_test",
                ClientOptions::default().with_network(network.clone()),
            )
            .unwrap();
            client
                .identify("user-1", None, IdentifyOptions::default())
                .await;
            (client, network)
        }

        fn last_body(network: &RecordingNetwork) -> Value {
            let requests = network.requests.lock();
            serde_json::from_slice(requests.last().unwrap().body.as_ref().unwrap()).unwrap()
        }

        #[tokio::test]
        async fn test_set_builds_set_verb() {
            let (client, network) = identified_client().await;
            let resp = client.user().set(json!({"plan": "pro"})).await;
            assert!(resp.is_success());

            let body = last_body(&network);
            assert_eq!(body["$set"]["plan"], json!("pro"));
            assert_eq!(body["distinct_id"], json!("user-1"));
            assert!(body["$insert_id"].is_string());
            assert!(body["$time"].is_u64());
        }

        #[tokio::test]
        async fn test_set_all_reserved_is_validation_error() {
            let (client, network) = identified_client().await;
            let sent = network.requests.lock().len();

            let resp = client.user().set(json!({"$internal": 1})).await;
            assert_eq!(resp.error_type(), Some(ErrorType::ValidationError));
            assert_eq!(network.requests.lock().len(), sent);
        }

        #[tokio::test]
        async fn test_unset_filters_reserved() {
            let (client, network) = identified_client().await;
            let resp = client
                .user()
                .unset(vec!["plan".into(), "$insert_id".into()])
                .await;
            assert!(resp.is_success());
            assert_eq!(last_body(&network)["$unset"], json!(["plan"]));
        }

        #[tokio::test]
        async fn test_add_email_rejects_invalid() {
            let (client, _) = identified_client().await;
            let resp = client.user().add_email("not-an-email").await;
            assert_eq!(resp.error_type(), Some(ErrorType::ValidationError));
        }

        #[tokio::test]
        async fn test_add_webpush_payload() {
            let (client, network) = identified_client().await;
            let resp = client
                .user()
                .add_webpush(json!({"endpoint": "https://push.example/abc"}))
                .await;
            assert!(resp.is_success());

            let body = last_body(&network);
            assert_eq!(
                body["$append"]["$webpush"]["endpoint"],
                json!("https://push.example/abc")
            );
            assert_eq!(body["$append"]["$id_provider"], json!("vapid"));
            assert!(body["$append"]["$device_id"].is_string());
        }

        #[tokio::test]
        async fn test_increment_coerces() {
            let (client, network) = identified_client().await;
            client.user().increment(json!({"logins": "2"})).await;
            assert_eq!(last_body(&network)["$add"]["logins"], json!(2.0));
        }

        #[tokio::test]
        async fn test_preferred_language() {
            let (client, network) = identified_client().await;
            client.user().set_preferred_language("fr").await;
            assert_eq!(
                last_body(&network)["$set"]["$preferred_language"],
                json!("fr")
            );
        }
    }
}
