//! Login, refresh and logout routes
//!
//! These are the only routes that write session cookies. Tokens stay in
//! httpOnly cookies; browser code only ever sees the `user` cookie with
//! `{user_id, roles}` decoded from the access token.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use backend_auth::{
    ACCESS_TOKEN_COOKIE, ACCESS_TOKEN_MAX_AGE, Claims, REFRESH_TOKEN_COOKIE,
    REFRESH_TOKEN_MAX_AGE, TokenResponse, USER_COOKIE, USER_COOKIE_MAX_AGE, UserSummary,
    decode_claims,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cookies::{self, CookieSettings};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct LoginForm {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// `POST /api/auth/login`
pub async fn login_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let _in_flight = state.metrics.begin_request();

    let form: LoginForm = serde_json::from_slice(&body).unwrap_or_default();
    let (Some(email), Some(password)) = (
        form.email.filter(|e| !e.is_empty()),
        form.password.filter(|p| !p.is_empty()),
    ) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({"error": "email and password required"}),
        );
    };

    let outcome = backend_auth::login(&state.client, &state.api_base, &email, &password)
        .await
        .and_then(with_issued_token);
    match outcome {
        Ok((tokens, issued)) => {
            info!("login succeeded");
            let user = issued.user.unwrap_or(UserSummary {
                user_id: Value::Null,
                roles: Value::Null,
            });
            session_response(&state.cookies, &tokens, Some(&user), issued.lifetime)
        }
        Err(e) => {
            state.metrics.record_error();
            failure_response(e, "invalid token response")
        }
    }
}

/// `POST /api/auth/refresh`
///
/// Goes through the refresh gate: the backend rotates refresh tokens, so two
/// tabs refreshing the same session at once must share one backend call.
pub async fn refresh_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let _in_flight = state.metrics.begin_request();

    let Some(refresh) = cookies::get_secret(&headers, REFRESH_TOKEN_COOKIE) else {
        return json_response(
            StatusCode::UNAUTHORIZED,
            json!({"error": "no refresh token"}),
        );
    };

    let outcome = state
        .refresh_gate
        .refresh(refresh.expose())
        .await
        .and_then(with_issued_token);
    match outcome {
        Ok((tokens, issued)) => {
            info!("session refreshed");
            // An undecodable token keeps whatever user cookie the browser has
            session_response(&state.cookies, &tokens, issued.user.as_ref(), issued.lifetime)
        }
        Err(e) => {
            state.metrics.record_error();
            failure_response(e, "invalid refresh response")
        }
    }
}

/// `POST /api/auth/logout`
///
/// Revoking the refresh token is best effort; the cookies are cleared no
/// matter what the backend says.
pub async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let _in_flight = state.metrics.begin_request();

    if let Some(refresh) = cookies::get_secret(&headers, REFRESH_TOKEN_COOKIE) {
        if let Err(e) =
            backend_auth::logout(&state.client, &state.api_base, refresh.expose()).await
        {
            warn!(error = %e, "backend logout failed, clearing cookies anyway");
        }
    }

    let mut response_headers = HeaderMap::new();
    for (name, http_only) in [
        (ACCESS_TOKEN_COOKIE, true),
        (REFRESH_TOKEN_COOKIE, true),
        (USER_COOKIE, false),
    ] {
        cookies::append(&mut response_headers, state.cookies.clear(name, http_only));
    }
    info!("session cleared");
    (response_headers, json_response(StatusCode::OK, json!({"ok": true}))).into_response()
}

/// What the session routes read from a freshly issued access token.
struct IssuedToken {
    user: Option<UserSummary>,
    lifetime: Duration,
}

/// An undecodable token gets the default lifetime and no user summary. A token
/// that is already expired is refused, since no cookie could carry it.
fn inspect_access_token(
    access_token: &str,
    now_secs: u64,
) -> Result<IssuedToken, backend_auth::Error> {
    let Some(claims) = decode_claims(access_token) else {
        return Ok(IssuedToken {
            user: None,
            lifetime: ACCESS_TOKEN_MAX_AGE,
        });
    };
    if claims.is_expired(now_secs) {
        return Err(backend_auth::Error::InvalidResponse(
            "access token already expired".into(),
        ));
    }
    debug!(user_id = ?claims.user_id(), roles = ?claims.roles(), "decoded access token");
    Ok(IssuedToken {
        lifetime: cookie_lifetime(&claims, now_secs),
        user: Some(claims.user_summary()),
    })
}

fn with_issued_token(
    tokens: TokenResponse,
) -> Result<(TokenResponse, IssuedToken), backend_auth::Error> {
    let issued = inspect_access_token(&tokens.access_token, unix_now())?;
    Ok((tokens, issued))
}

/// Cookies never outlive the token they describe.
fn cookie_lifetime(claims: &Claims, now_secs: u64) -> Duration {
    claims
        .expires_at()
        .map(|exp| Duration::from_secs(exp.saturating_sub(now_secs)).min(ACCESS_TOKEN_MAX_AGE))
        .unwrap_or(ACCESS_TOKEN_MAX_AGE)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn session_response(
    settings: &CookieSettings,
    tokens: &TokenResponse,
    user: Option<&UserSummary>,
    lifetime: Duration,
) -> Response {
    let mut headers = HeaderMap::new();
    cookies::append(
        &mut headers,
        settings.set(
            ACCESS_TOKEN_COOKIE,
            &tokens.access_token,
            lifetime,
            true,
        ),
    );
    cookies::append(
        &mut headers,
        settings.set(
            REFRESH_TOKEN_COOKIE,
            &tokens.refresh_token,
            REFRESH_TOKEN_MAX_AGE,
            true,
        ),
    );
    if let Some(user) = user {
        match serde_json::to_string(user) {
            Ok(value) => cookies::append(
                &mut headers,
                settings.set(USER_COOKIE, &value, lifetime.min(USER_COOKIE_MAX_AGE), false),
            ),
            Err(e) => warn!(error = %e, "failed to encode user cookie"),
        }
    }
    (headers, json_response(StatusCode::OK, json!({"ok": true}))).into_response()
}

/// Backend rejections keep their status. A JSON body is relayed as is; any
/// other body becomes the `error` field of a JSON object.
fn failure_response(err: backend_auth::Error, invalid_message: &str) -> Response {
    match err {
        backend_auth::Error::Rejected { status, body } => {
            warn!(status, "backend rejected session call");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            if serde_json::from_str::<Value>(&body).is_ok() {
                (status, [(CONTENT_TYPE, "application/json")], body).into_response()
            } else {
                json_response(status, json!({"error": body}))
            }
        }
        backend_auth::Error::InvalidResponse(msg) => {
            warn!(error = %msg, "backend returned an unusable token pair");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": invalid_message}),
            )
        }
        backend_auth::Error::Http(msg) => {
            warn!(error = %msg, "backend unreachable");
            json_response(
                StatusCode::BAD_GATEWAY,
                json!({"error": "backend unavailable"}),
            )
        }
    }
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}
