//! Session lifecycle management
//!
//! Keeps the cookie-held session of a browser alive: decodes the access
//! token, refreshes it through the identity service when it has expired,
//! sends anonymous users on protected routes to sign-in and narrows
//! circle-scoped queries to circles the user belongs to.

mod circles;
mod claims;
mod cookies;
mod manager;
mod middleware;
mod policy;
mod refresh;

pub use circles::{
    requested_circles, rewrite_circles_query, Circle, CircleAuthorizationFilter, CircleId, CIRCLES_PARAM,
};
pub use claims::{decode_claims, TokenClaims};
pub use cookies::{
    access_token_from_headers, CookiePolicy, CredentialStore, TokenPair, ACCESS_TOKEN_COOKIE, CIRCLES_COOKIE,
    REFRESH_TOKEN_COOKIE,
};
pub use manager::{Session, SessionAction, SessionContext, SessionManager, SessionResolution, SessionState};
pub use middleware::session_middleware;
pub use policy::{return_target, RoutePolicy, REDIRECTED_FROM_PARAM};
pub use refresh::{IdentityClient, RefreshCoordinator, TokenRefresher};

use thiserror::Error;

/// Session errors
///
/// Cloneable so one refresh outcome can be handed to every waiting request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Token refresh rejected with status {0}")]
    RefreshFailed(u16),

    #[error("Token refresh request failed: {0}")]
    RefreshTransport(String),

    #[error("Unexpected identity response: {0}")]
    RefreshPayload(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Access token could not be decoded: {0}")]
    TokenDecode(String),

    #[error("Sign-in rejected with status {0}")]
    LoginRejected(u16),

    #[error("Identity request failed: {0}")]
    Identity(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}
