//! Backend login, refresh and logout calls
//!
//! All three POST JSON to the backend's auth endpoints. Login and refresh
//! both answer with a fresh `{access_token, refresh_token}` pair; the backend
//! rotates the refresh token on every refresh.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, endpoint};
use crate::error::{Error, Result};

/// Token pair returned by login and refresh.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Wire shape before validation: the backend may omit either token.
#[derive(Deserialize)]
struct RawTokens {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshPayload<'a> {
    refresh_token: &'a str,
}

/// Exchange email and password for a token pair.
pub async fn login(
    client: &reqwest::Client,
    api_base: &str,
    email: &str,
    password: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint(api_base, LOGIN_PATH))
        .json(&Credentials { email, password })
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    read_token_pair(response).await
}

/// POST the refresh token and hand back the raw response.
///
/// The forwarder only cares whether this succeeded (2xx), not what the
/// backend returned, so the body is left unread.
pub async fn request_refresh(
    client: &reqwest::Client,
    api_base: &str,
    refresh: &str,
) -> reqwest::Result<reqwest::Response> {
    client
        .post(endpoint(api_base, REFRESH_PATH))
        .json(&RefreshPayload {
            refresh_token: refresh,
        })
        .send()
        .await
}

/// Exchange a refresh token for a new token pair.
pub async fn refresh_token(
    client: &reqwest::Client,
    api_base: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = request_refresh(client, api_base, refresh)
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    read_token_pair(response).await
}

/// Revoke a refresh token on the backend.
pub async fn logout(client: &reqwest::Client, api_base: &str, refresh: &str) -> Result<()> {
    let response = client
        .post(endpoint(api_base, LOGOUT_PATH))
        .json(&RefreshPayload {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(rejected(response).await);
    }
    debug!("backend session revoked");
    Ok(())
}

async fn read_token_pair(response: reqwest::Response) -> Result<TokenResponse> {
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }

    let raw = response
        .json::<RawTokens>()
        .await
        .map_err(|e| Error::InvalidResponse(e.to_string()))?;

    match (raw.access_token, raw.refresh_token) {
        (Some(access_token), Some(refresh_token))
            if !access_token.is_empty() && !refresh_token.is_empty() =>
        {
            Ok(TokenResponse {
                access_token,
                refresh_token,
            })
        }
        _ => Err(Error::InvalidResponse("missing access or refresh token".into())),
    }
}

async fn rejected(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Error::Rejected { status, body }
}
