//! Single-flight refresh per session
//!
//! Concurrent refreshes of the same session share one backend call. Without
//! this, two browser tabs refreshing at once would both present the same
//! refresh token, and since the backend rotates it on use, the second call
//! would be rejected and log the user out.
//!
//! Sessions are keyed by a SHA-256 digest of the refresh token so raw
//! credentials never sit in the map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::token::{TokenResponse, refresh_token};

type InFlight = Shared<BoxFuture<'static, Result<TokenResponse>>>;

/// Refreshes in progress, keyed by session. The id tells a finishing flight
/// apart from a newer one for the same session.
type FlightMap = Arc<Mutex<HashMap<String, (u64, InFlight)>>>;

pub struct RefreshGate {
    client: reqwest::Client,
    api_base: String,
    next_id: AtomicU64,
    in_flight: FlightMap,
}

impl RefreshGate {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            next_id: AtomicU64::new(0),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refresh the session owning `refresh`, joining an in-flight refresh of
    /// the same session if there is one. Every joined caller receives the
    /// same outcome.
    ///
    /// The backend call runs on its own task and clears its map entry when it
    /// finishes, so callers that give up early leave nothing behind.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenResponse> {
        let key = session_key(refresh);

        let flight = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some((_, existing)) => {
                    debug!(session = %key, "joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = self.start_flight(key.clone(), id, refresh.to_owned());
                    // Inserted before the lock is released, so the task's own
                    // removal can never run first
                    in_flight.insert(key, (id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    fn start_flight(&self, key: String, id: u64, token: String) -> InFlight {
        let client = self.client.clone();
        let api_base = self.api_base.clone();
        let in_flight = self.in_flight.clone();

        let task = tokio::spawn(async move {
            let outcome = refresh_token(&client, &api_base, &token).await;

            let mut in_flight = in_flight.lock().await;
            if in_flight
                .get(&key)
                .is_some_and(|(current, _)| *current == id)
            {
                in_flight.remove(&key);
            }
            outcome
        });

        task.map(|joined| {
            joined.unwrap_or_else(|e| Err(Error::Http(format!("refresh task failed: {e}"))))
        })
        .boxed()
        .shared()
    }

    /// Number of sessions with a refresh currently in progress.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

fn session_key(refresh: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(refresh.as_bytes()))
}
