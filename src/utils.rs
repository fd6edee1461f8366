//! Small helpers: clocks, idempotency ids, JWT expiry, query strings.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use url::form_urlencoded;
use uuid::Uuid;

/// Current Unix time in milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Fresh idempotency id for event envelopes.
pub fn new_insert_id() -> String {
    Uuid::new_v4().to_string()
}

/// Expiry of a JWT's `exp` claim in Unix milliseconds.
///
/// Decodes the payload segment only; the signature is the collector's
/// problem. Returns `None` for malformed tokens or tokens without `exp`.
pub fn jwt_expiry_ms(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_u64().map(|secs| secs * 1000)
}

/// Whether a token's `exp` claim is at or past `now_ms`.
///
/// Tokens that cannot be decoded are treated as unexpired; the collector
/// rejects them with a proper error envelope instead.
pub fn jwt_expired(token: &str, now_ms: u64) -> bool {
    match jwt_expiry_ms(token) {
        Some(expiry) => expiry <= now_ms,
        None => false,
    }
}

/// Percent-encoded query string from present (key, value) pairs.
///
/// Pairs with a `None` value are dropped, mirroring the collector's
/// treatment of absent query parameters.
pub fn build_query(pairs: &[(&str, Option<String>)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in pairs {
        if let Some(value) = value {
            serializer.append_pair(key, value);
            any = true;
        }
    }
    if any {
        serializer.finish()
    } else {
        String::new()
    }
}

/// Resource path under the per-subscriber API root.
pub fn subscriber_path(distinct_id: &str, resource: &str, query: &str) -> String {
    let base = format!("v2/subscriber/{distinct_id}/{resource}");
    if query.is_empty() {
        base
    } else {
        format!("{base}/?{query}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn make_token(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_epoch_ms_is_sane() {
        // after 2020-01-01 in ms
        assert!(epoch_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_insert_ids_are_unique() {
        assert_ne!(new_insert_id(), new_insert_id());
    }

    #[test]
    fn test_jwt_expiry_decodes_exp() {
        let token = make_token(serde_json::json!({"exp": 1_700_000_000u64}));
        assert_eq!(jwt_expiry_ms(&token), Some(1_700_000_000_000));
    }

    #[test]
    fn test_jwt_expiry_missing_claim() {
        let token = make_token(serde_json::json!({"sub": "user-1"}));
        assert_eq!(jwt_expiry_ms(&token), None);
    }

    #[test]
    fn test_jwt_expiry_malformed_token() {
        assert_eq!(jwt_expiry_ms("not-a-jwt"), None);
        assert_eq!(jwt_expiry_ms("a.!!!.c"), None);
    }

    #[test]
    fn test_jwt_expired() {
        let token = make_token(serde_json::json!({"exp": 1000u64}));
        assert!(jwt_expired(&token, 1_000_001));
        assert!(!jwt_expired(&token, 999_999));
        // undecodable tokens are not treated as expired
        assert!(!jwt_expired("garbage", u64::MAX));
    }

    #[test]
    fn test_build_query_drops_absent() {
        let query = build_query(&[
            ("tenant_id", Some("acme".to_string())),
            ("limit", None),
            ("show_opt_out_channels", Some("true".to_string())),
        ]);
        assert_eq!(query, "tenant_id=acme&show_opt_out_channels=true");
    }

    #[test]
    fn test_build_query_empty() {
        assert_eq!(build_query(&[("tenant_id", None)]), "");
    }

    #[test]
    fn test_subscriber_path() {
        assert_eq!(
            subscriber_path("user-1", "full_preference", ""),
            "v2/subscriber/user-1/full_preference"
        );
        assert_eq!(
            subscriber_path("user-1", "category/promo", "tenant_id=acme"),
            "v2/subscriber/user-1/category/promo/?tenant_id=acme"
        );
    }
}
