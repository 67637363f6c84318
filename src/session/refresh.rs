//! Token exchange with the identity service

use super::circles::{Circle, CircleId};
use super::cookies::TokenPair;
use super::SessionError;
use crate::config::IdentityConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Exchanges a refresh token for a new token pair
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError>;
}

/// `{ "data": ... }` envelope used by every identity response
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CircleRecord {
    #[serde(default)]
    circle_name: Option<String>,
    circle_id: CircleId,
}

impl From<CircleRecord> for Circle {
    fn from(record: CircleRecord) -> Self {
        Circle {
            name: record.circle_name.unwrap_or_default(),
            id: record.circle_id,
        }
    }
}

/// HTTP client for the identity service
pub struct IdentityClient {
    client: Client,
    refresh_url: String,
    login_url: String,
    circles_url: String,
}

impl IdentityClient {
    pub fn new(config: &IdentityConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SessionError::Client(e.to_string()))?;

        Ok(Self {
            client,
            refresh_url: config.refresh_url(),
            login_url: config.login_url(),
            circles_url: config.circles_url(),
        })
    }

    /// Exchange user credentials for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, SessionError> {
        let response = self
            .client
            .post(&self.login_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| SessionError::Identity(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 300 {
            tracing::info!(status = status.as_u16(), "Sign-in rejected by identity service");
            return Err(SessionError::LoginRejected(status.as_u16()));
        }

        read_data(response).await
    }

    /// Circles the owner of `access_token` belongs to
    pub async fn fetch_circles(&self, access_token: &str) -> Result<Vec<Circle>, SessionError> {
        let response = self
            .client
            .get(&self.circles_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SessionError::Identity(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 300 {
            return Err(SessionError::Identity(format!(
                "circles lookup returned status {}",
                status.as_u16()
            )));
        }

        let records: Vec<CircleRecord> = read_data(response).await?;
        Ok(records.into_iter().map(Circle::from).collect())
    }
}

#[async_trait]
impl TokenRefresher for IdentityClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let response = self
            .client
            .post(&self.refresh_url)
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| SessionError::RefreshTransport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 300 {
            return Err(SessionError::RefreshFailed(status.as_u16()));
        }

        read_data(response).await
    }
}

async fn read_data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SessionError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| SessionError::RefreshTransport(e.to_string()))?;

    serde_json::from_slice::<DataEnvelope<T>>(&bytes)
        .map(|envelope| envelope.data)
        .map_err(|e| SessionError::RefreshPayload(e.to_string()))
}

struct CachedOutcome {
    result: Result<TokenPair, SessionError>,
    at: Instant,
}

type Slot = Arc<Mutex<Option<CachedOutcome>>>;

/// Serializes refreshes of the same refresh token
///
/// Concurrent requests carrying one refresh token share a single exchange:
/// the first caller performs it and the rest reuse its outcome for `grace`.
/// The identity service rotates refresh tokens, so replaying the old one
/// would fail and log the user out.
pub struct RefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    slots: DashMap<String, Slot>,
    grace: Duration,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn TokenRefresher>, grace: Duration) -> Self {
        Self {
            refresher,
            slots: DashMap::new(),
            grace,
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let key = session_key(refresh_token);
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone();

        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.at.elapsed() < self.grace {
                tracing::debug!(session = %&key[..12], "Reusing concurrent token refresh");
                return cached.result.clone();
            }
        }

        let result = self.refresher.refresh(refresh_token).await;
        match &result {
            Ok(_) => tracing::debug!(session = %&key[..12], "Access token refreshed"),
            Err(e) => tracing::warn!(session = %&key[..12], error = %e, "Token refresh failed"),
        }

        *guard = Some(CachedOutcome {
            result: result.clone(),
            at: Instant::now(),
        });
        drop(guard);

        self.prune();
        result
    }

    /// Number of tracked refresh tokens
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    fn prune(&self) {
        let grace = self.grace;
        self.slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|cached| cached.at.elapsed() < grace)
                .unwrap_or(false),
            // a refresh is running on it
            Err(_) => true,
        });
    }
}

/// Stable, non-reversible key for a refresh token
fn session_key(refresh_token: &str) -> String {
    hex::encode(Sha256::digest(refresh_token.as_bytes()))
}
