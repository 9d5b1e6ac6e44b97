//! Session cookie reading and `Set-Cookie` rendering
//!
//! Values are percent-encoded on the way out and decoded on the way in, so a
//! JSON `user` cookie survives the round trip through the browser.

use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use common::Secret;
use tracing::warn;

/// Attributes shared by every cookie this service sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieSettings {
    pub secure: bool,
}

impl CookieSettings {
    /// Render a `Set-Cookie` value. `Path=/` and `SameSite=Lax` always apply.
    pub fn set(&self, name: &str, value: &str, max_age: Duration, http_only: bool) -> String {
        let mut cookie = format!(
            "{name}={}; Path=/; Max-Age={}; SameSite=Lax",
            urlencoding::encode(value),
            max_age.as_secs()
        );
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Expire a cookie immediately.
    pub fn clear(&self, name: &str, http_only: bool) -> String {
        self.set(name, "", Duration::ZERO, http_only)
    }
}

/// Value of the first cookie called `name` across all `Cookie` headers.
pub fn get(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| {
            let value = value.trim_matches('"');
            urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
}

/// A credential cookie, `None` when absent or empty.
pub fn get_secret(headers: &HeaderMap, name: &str) -> Option<Secret<String>> {
    Secret::non_empty(get(headers, name))
}

pub fn append(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::try_from(cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "dropping unrenderable cookie"),
    }
}
