//! Best-effort JWT payload decoding
//!
//! No signature verification: the backend is the authority on token
//! validity. The decoded claims only feed display data (the `user` cookie)
//! and cheap expiry checks.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::{Map, Value};

/// Decoded JWT payload. Accessors cover the claims the storefront reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims(Map<String, Value>);

/// Contents of the script-readable `user` cookie.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserSummary {
    pub user_id: Value,
    pub roles: Value,
}

/// Decode the payload segment of a JWT.
///
/// Returns `None` for anything malformed: fewer than two segments, invalid
/// base64, invalid JSON, or a payload that is not a JSON object.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(Claims(map)),
        _ => None,
    }
}

impl Claims {
    pub fn user_id(&self) -> Option<&Value> {
        self.0.get("user_id").filter(|v| !v.is_null())
    }

    /// Roles as a list. The backend encodes them as a comma-separated string;
    /// a JSON array of strings is accepted as well.
    pub fn roles(&self) -> Vec<String> {
        match self.0.get("roles") {
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_owned)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `exp` in unix seconds.
    pub fn expires_at(&self) -> Option<u64> {
        let exp = self.0.get("exp")?;
        exp.as_u64().or_else(|| exp.as_f64().map(|f| f as u64))
    }

    /// Tokens without an `exp` claim never count as expired.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now_secs)
    }

    /// `user_id` and `roles` verbatim, `null` when absent or falsy.
    pub fn user_summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id().filter(|v| truthy(v)).cloned().unwrap_or(Value::Null),
            roles: self
                .0
                .get("roles")
                .filter(|v| truthy(v))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
