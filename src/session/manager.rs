//! Per-request session resolution
//!
//! A request moves through `Anonymous -> Decoding -> {Valid | Refreshing}` and
//! ends as `Authenticated`, `Anonymous` or `LoggedOut`. At most one refresh
//! exchange happens per request.

use super::circles::{requested_circles, rewrite_circles_query, Circle, CircleAuthorizationFilter};
use super::claims::{decode_claims, TokenClaims};
use super::cookies::{CookiePolicy, CredentialStore};
use super::policy::RoutePolicy;
use super::refresh::{RefreshCoordinator, TokenRefresher};
use super::SessionError;
use crate::config::SessionConfig;
use crate::{RequestContext, Secret};
use serde::Serialize;
use std::sync::Arc;

/// Session reconstructed from the request cookies
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    #[serde(skip)]
    pub access_token: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub circles: Vec<Circle>,
    pub user_id: Option<String>,
}

/// Terminal state of a request's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
    /// A refresh failed and the session cookies were cleared
    LoggedOut,
}

/// What the pipeline does next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Continue,
    /// Stop and send the caller to this location
    Redirect(String),
}

/// Outcome of resolving one request
#[derive(Debug, Clone)]
pub struct SessionResolution {
    pub state: SessionState,
    pub session: Option<Session>,
    pub action: SessionAction,
    /// Whether new tokens were stored during resolution
    pub refreshed: bool,
}

impl SessionResolution {
    fn new(state: SessionState, session: Option<Session>) -> Self {
        Self {
            state,
            session,
            action: SessionAction::Continue,
            refreshed: false,
        }
    }

    fn redirect(mut self, location: String) -> Self {
        self.action = SessionAction::Redirect(location);
        self
    }
}

/// Session data handed to downstream handlers as a request extension
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub circles: Vec<Circle>,
}

impl SessionContext {
    pub fn new(request: &RequestContext, session: Option<&Session>) -> Self {
        match session {
            Some(session) => Self {
                request_id: request.request_id.clone(),
                user_id: session.user_id.clone(),
                access_token: Some(session.access_token.clone()),
                circles: session.circles.clone(),
            },
            None => Self {
                request_id: request.request_id.clone(),
                ..Self::default()
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Session lifecycle manager
pub struct SessionManager {
    policy: RoutePolicy,
    cookie_policy: CookiePolicy,
    coordinator: RefreshCoordinator,
    expiration_buffer_secs: i64,
    token_secret: Option<Secret>,
}

impl SessionManager {
    pub fn new(config: &SessionConfig, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            policy: RoutePolicy::from(config),
            cookie_policy: CookiePolicy::from(config),
            coordinator: RefreshCoordinator::new(refresher, config.refresh_grace),
            expiration_buffer_secs: config.expiration_buffer_secs,
            token_secret: config.token_secret.clone(),
        }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookie_policy
    }

    /// Whether `token` is absent, undecodable or expires within the buffer
    pub fn is_token_expired(&self, token: Option<&str>, now: i64) -> bool {
        token
            .and_then(|t| self.claims(t))
            .map(|claims| claims.is_expired(now, self.expiration_buffer_secs))
            .unwrap_or(true)
    }

    /// Exchange the stored refresh token and store the new pair
    ///
    /// On failure both tokens are cleared; no partial state survives.
    pub async fn refresh(&self, store: &mut CredentialStore) -> Result<(), SessionError> {
        let Some(refresh_token) = store.refresh_token() else {
            store.clear_tokens();
            return Err(SessionError::MissingRefreshToken);
        };

        match self.coordinator.refresh(&refresh_token).await {
            Ok(tokens) => {
                store.store_tokens(&tokens);
                Ok(())
            }
            Err(e) => {
                store.clear_tokens();
                Err(e)
            }
        }
    }

    pub async fn resolve_session(
        &self,
        path: &str,
        query: Option<&str>,
        store: &mut CredentialStore,
    ) -> SessionResolution {
        self.resolve_session_at(path, query, store, chrono::Utc::now().timestamp())
            .await
    }

    /// Resolve a request against the clock value `now` (Unix seconds)
    pub async fn resolve_session_at(
        &self,
        path: &str,
        query: Option<&str>,
        store: &mut CredentialStore,
        now: i64,
    ) -> SessionResolution {
        let mut resolution = SessionResolution::new(SessionState::Anonymous, None);

        if store.access_token().is_some() || store.refresh_token().is_some() {
            let mut claims = store.access_token().and_then(|t| self.claims(&t));

            let expired = claims
                .as_ref()
                .map(|c| c.is_expired(now, self.expiration_buffer_secs))
                .unwrap_or(true);

            if expired {
                if let Err(e) = self.refresh(store).await {
                    tracing::info!(path = %path, error = %e, "Session refresh failed, signing out");
                    store.clear_all();
                    return SessionResolution::new(SessionState::LoggedOut, None)
                        .redirect(self.policy.sign_in_path().to_string());
                }
                resolution.refreshed = true;
                claims = store.access_token().and_then(|t| self.claims(&t));
            }

            if let (Some(claims), Some(access_token)) = (claims, store.access_token()) {
                resolution.state = SessionState::Authenticated;
                resolution.session = Some(Session {
                    access_token,
                    refresh_token: store.refresh_token(),
                    circles: store.circles(),
                    user_id: claims.user_id(),
                });
            }
        }

        if resolution.session.is_none() && self.policy.requires_session(path, query) {
            tracing::debug!(path = %path, "Anonymous request for protected route");
            let location = self.policy.sign_in_redirect(path);
            return resolution.redirect(location);
        }

        if let Some(location) = self.narrow_circles(path, query, resolution.session.as_ref()) {
            tracing::debug!(path = %path, "Removing unauthorized circles from request");
            return resolution.redirect(location);
        }

        resolution
    }

    fn narrow_circles(&self, path: &str, query: Option<&str>, session: Option<&Session>) -> Option<String> {
        let session = session?;
        let requested = requested_circles(query)?;

        let filter = CircleAuthorizationFilter::new(&session.circles);
        if filter.is_empty() {
            return None;
        }

        let valid = filter.narrow(&requested)?;
        let query = rewrite_circles_query(query.unwrap_or_default(), &valid);
        Some(format!("{}?{}", path, query))
    }

    fn claims(&self, token: &str) -> Option<TokenClaims> {
        match decode_claims(token, self.token_secret.as_ref()) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!(error = %e, "Treating undecodable access token as expired");
                None
            }
        }
    }
}
