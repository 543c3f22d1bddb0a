//! Telegram mini app identity check
//!
//! The page sends the raw `initData` string in an `Authorization: Telegram <data>`
//! header. It is trusted when its `hash` field is the HMAC-SHA256 of the
//! remaining fields, sorted and newline-joined, keyed with
//! HMAC-SHA256(key = "WebAppData", msg = bot token), and when it is fresh.

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::server::error_body;
use crate::telegram::User;

type HmacSha256 = Hmac<Sha256>;

/// Oldest init data still accepted, in seconds
pub const MAX_INIT_DATA_AGE_SECS: i64 = 5 * 60;

/// User id injected when identity checks are disabled
pub const TESTING_USER_ID: i64 = -12345;

#[derive(Error, Debug, PartialEq)]
pub enum IdentityError {
    #[error("missing hash")]
    MissingHash,

    #[error("undecodable init data: {0}")]
    Decode(String),

    #[error("hash mismatch")]
    HashMismatch,

    #[error("malformed field {field}: {reason}")]
    MalformedField { field: String, reason: String },

    #[error("init data expired")]
    Expired,
}

/// Identity extracted from verified init data
#[derive(Debug, Clone, PartialEq)]
pub struct TelegramAuth {
    pub user: User,
    pub auth_date: DateTime<Utc>,
    pub query_id: Option<String>,
}

impl TelegramAuth {
    pub fn testing() -> Self {
        Self {
            user: User {
                id: TESTING_USER_ID,
                is_bot: false,
                first_name: "Test".to_string(),
                last_name: None,
                username: Some("testing".to_string()),
            },
            auth_date: Utc::now(),
            query_id: None,
        }
    }
}

/// Key for init data signatures, derived once from the bot token
pub fn derive_secret_key(bot_token: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(b"WebAppData").expect("HMAC accepts any key length");
    mac.update(bot_token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn unescape(raw: &str) -> Result<String, IdentityError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| IdentityError::Decode(e.to_string()))
}

fn malformed(field: &str, reason: impl ToString) -> IdentityError {
    IdentityError::MalformedField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Verify `init_data` against `secret_key` and extract the user
pub fn check_init_data(
    init_data: &str,
    secret_key: &[u8],
    now: DateTime<Utc>,
) -> Result<TelegramAuth, IdentityError> {
    let mut received_hash = None;
    let mut signed_pairs = Vec::new();
    let mut fields = HashMap::new();

    for pair in init_data.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "hash" {
            received_hash = Some(value.to_string());
            continue;
        }
        let (key, value) = (unescape(key)?, unescape(value)?);
        signed_pairs.push(format!("{}={}", key, value));
        fields.entry(key).or_insert(value);
    }

    let received_hash = received_hash.ok_or(IdentityError::MissingHash)?;
    let received = hex::decode(&received_hash).map_err(|_| IdentityError::HashMismatch)?;

    // sorted as whole `key=value` strings, not by key
    signed_pairs.sort();
    let check_string = signed_pairs.join("\n");

    let mut mac = HmacSha256::new_from_slice(secret_key).map_err(|e| IdentityError::Decode(e.to_string()))?;
    mac.update(check_string.as_bytes());
    mac.verify_slice(&received)
        .map_err(|_| IdentityError::HashMismatch)?;

    let auth_secs: i64 = fields
        .get("auth_date")
        .ok_or_else(|| malformed("auth_date", "missing"))?
        .parse()
        .map_err(|e| malformed("auth_date", e))?;
    let auth_date = Utc
        .timestamp_opt(auth_secs, 0)
        .single()
        .ok_or_else(|| malformed("auth_date", "out of range"))?;
    if (now - auth_date).num_seconds() > MAX_INIT_DATA_AGE_SECS {
        return Err(IdentityError::Expired);
    }

    let user: User = serde_json::from_str(fields.get("user").ok_or_else(|| malformed("user", "missing"))?)
        .map_err(|e| malformed("user", e))?;

    Ok(TelegramAuth {
        user,
        auth_date,
        query_id: fields.get("query_id").cloned(),
    })
}

/// Authenticate a request, or produce the 401 response to send back
pub fn require_telegram_auth(
    headers: &HeaderMap,
    secret_key: &[u8],
    testing: bool,
) -> Result<TelegramAuth, Response> {
    if testing {
        return Ok(TelegramAuth::testing());
    }

    let unauthorized = |message: &str| (StatusCode::UNAUTHORIZED, Json(error_body(message))).into_response();

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing authorization"))?;
    let init_data = header
        .strip_prefix("Telegram ")
        .ok_or_else(|| unauthorized("invalid authorization scheme"))?;

    check_init_data(init_data, secret_key, Utc::now()).map_err(|e| {
        debug!("Rejected init data: {}", e);
        unauthorized(&e.to_string())
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    const TOKEN: &str = "123456:TEST-TOKEN";

    #[test]
    fn test_fresh_init_data_passes() {
        let key = derive_secret_key(TOKEN);
        let now = Utc::now();
        let data = init_data_for(77, now - Duration::minutes(4), &key);

        let auth = check_init_data(&data, &key, now).unwrap();
        assert_eq!(auth.user.id, 77);
        assert_eq!(auth.user.username_or_empty(), "ann");
        assert_eq!(auth.query_id.as_deref(), Some("AAF1"));
    }

    #[test]
    fn test_key_prefix_sorts_as_pair_string() {
        let key = derive_secret_key(TOKEN);
        let now = Utc::now();
        let auth = now.timestamp().to_string();
        // "a-b=..." sorts before "a=..." even though key "a" sorts before "a-b"
        let data = sign_init_data(
            &[
                ("a", "1"),
                ("a-b", "2"),
                ("auth_date", &auth),
                ("user", r#"{"id":5,"first_name":"Ann"}"#),
            ],
            &key,
        );

        let auth = check_init_data(&data, &key, now).unwrap();
        assert_eq!(auth.user.id, 5);
    }

    #[test]
    fn test_stale_init_data_expires() {
        let key = derive_secret_key(TOKEN);
        let now = Utc::now();
        let data = init_data_for(77, now - Duration::minutes(6), &key);

        assert_eq!(check_init_data(&data, &key, now), Err(IdentityError::Expired));
    }

    #[test]
    fn test_tampered_field_fails() {
        let key = derive_secret_key(TOKEN);
        let now = Utc::now();
        let data = init_data_for(77, now, &key).replace("AAF1", "AAF2");

        assert_eq!(check_init_data(&data, &key, now), Err(IdentityError::HashMismatch));
    }

    #[test]
    fn test_other_bot_token_fails() {
        let now = Utc::now();
        let data = init_data_for(77, now, &derive_secret_key("999:OTHER"));

        assert_eq!(
            check_init_data(&data, &derive_secret_key(TOKEN), now),
            Err(IdentityError::HashMismatch)
        );
    }

    #[test]
    fn test_missing_hash() {
        let key = derive_secret_key(TOKEN);
        assert_eq!(
            check_init_data("auth_date=1&user=%7B%7D", &key, Utc::now()),
            Err(IdentityError::MissingHash)
        );
    }

    #[test]
    fn test_testing_mode_injects_user() {
        let auth = require_telegram_auth(&HeaderMap::new(), &[], true).unwrap();
        assert_eq!(auth.user.id, TESTING_USER_ID);
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let response = require_telegram_auth(&HeaderMap::new(), &[], false).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
