//! Backend auth endpoints and session cookie settings
//!
//! Paths are relative to the configured backend base URL. Cookie lifetimes
//! mirror the backend's token lifetimes: the access token is short-lived, the
//! refresh token lasts a week.

use std::time::Duration;

/// Backend base URL used when nothing is configured
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

pub const LOGIN_PATH: &str = "/api/v1/auth/login";

/// Refresh endpoint, POSTed with `{"refresh_token": "..."}`
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";

pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";

/// httpOnly cookie carrying the bearer token
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// httpOnly cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Script-readable cookie with `{user_id, roles}` for display purposes
pub const USER_COOKIE: &str = "user";

pub const ACCESS_TOKEN_MAX_AGE: Duration = Duration::from_secs(15 * 60);

pub const REFRESH_TOKEN_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const USER_COOKIE_MAX_AGE: Duration = ACCESS_TOKEN_MAX_AGE;

/// Join a backend base URL and an absolute path without doubling the slash.
pub fn endpoint(api_base: &str, path: &str) -> String {
    format!("{}{}", api_base.trim_end_matches('/'), path)
}
